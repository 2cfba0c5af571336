//! SNOMED CT concept identifiers, and codelists that group them into categories.

mod codelist;
pub use codelist::CategoryCodelist;

use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A SNOMED CT concept identifier (SCTID).
///
/// SCTIDs are decimal integers of between 6 and 18 digits with no leading
/// zero, so they always fit in a `u64`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SnomedCode(u64);

impl SnomedCode {
    pub fn from_str(v: &str) -> Result<Self> {
        let v = v.trim();
        ensure!(
            (6..=18).contains(&v.len()),
            "SCTIDs are between 6 and 18 digits long, found {} characters",
            v.len()
        );
        ensure!(
            v.bytes().all(|ch| ch.is_ascii_digit()),
            "SCTIDs contain only digits"
        );
        ensure!(!v.starts_with('0'), "SCTIDs never start with a zero");
        // length and digit checks above mean this cannot overflow or fail
        Ok(SnomedCode(v.parse().unwrap()))
    }

    pub fn from_u64(v: u64) -> Result<Self> {
        ensure!(
            (100_000..=999_999_999_999_999_999).contains(&v),
            "SCTIDs are between 6 and 18 digits long, found {}",
            v
        );
        Ok(SnomedCode(v))
    }
}

impl fmt::Debug for SnomedCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for SnomedCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<'a> TryFrom<&'a str> for SnomedCode {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_str(s)
    }
}

impl FromStr for SnomedCode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Serialize for SnomedCode {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if s.is_human_readable() {
            s.collect_str(&self.0)
        } else {
            s.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SnomedCode {
    fn deserialize<D>(deserializer: D) -> Result<SnomedCode, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(SnomedCodeVisitor)
        } else {
            deserializer.deserialize_u64(SnomedCodeVisitor)
        }
    }
}

struct SnomedCodeVisitor;

impl<'de> serde::de::Visitor<'de> for SnomedCodeVisitor {
    type Value = SnomedCode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a SNOMED CT concept identifier (either as a number or a string)")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        SnomedCode::from_str(v).map_err(serde::de::Error::custom)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        SnomedCode::from_u64(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::SnomedCode;

    #[test]
    fn valid_codes_parse() {
        assert_eq!(
            SnomedCode::from_str("92381000000106").unwrap(),
            SnomedCode::from_u64(92381000000106).unwrap()
        );
        assert_eq!(SnomedCode::from_str("186019001").unwrap().to_string(), "186019001");
    }

    #[test]
    fn invalid_codes_rejected() {
        // too short
        assert!(SnomedCode::from_str("12345").is_err());
        // leading zero
        assert!(SnomedCode::from_str("0123456").is_err());
        // not a number
        assert!(SnomedCode::from_str("G30..").is_err());
        assert!(SnomedCode::from_str("").is_err());
    }
}
