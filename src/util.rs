use crate::{ethnicity::SusCode, snomed::SnomedCode};
use serde::{de, Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a SNOMED CT code, mapping anything unparseable to `None`.
///
/// The raw extract contains non-SNOMED entries (local codes, free text) in the
/// code column. These rows carry no information for us, so they are dropped
/// rather than treated as errors.
pub fn maybe_snomed<'de, D>(d: D) -> Result<Option<SnomedCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    Ok(SnomedCode::from_str(s).ok())
}

/// Parse an ethnicity letter from the administrative linkage, mapping 'null'
/// and the empty string to `None`.
///
/// Letters outside the operative alphabet are kept as data; whether a letter
/// is meaningful is decided by the classification rules, not here.
pub fn maybe_sus<'de, D>(d: D) -> Result<Option<SusCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        SusCode::from_str(s).map(Some).map_err(de::Error::custom)
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
