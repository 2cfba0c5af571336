pub mod ethnicity;
pub mod harmonise;
pub mod snomed;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDate;
use itertools::Either;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io, iter,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    ethnicity::{Ethnicity16, Ethnicity5, SusCode},
    harmonise::{EthnicityRecord, EthnicityRecords},
    snomed::{CategoryCodelist, SnomedCode},
    util::header,
};
use crate::util::{maybe_snomed, maybe_sus};

/// The reference date the population is selected at: patients must have an
/// active practice registration on this day to enter the dataset.
pub fn default_index_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, 31).unwrap()
}

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

#[derive(Debug, Clone, Deserialize)]
struct PatientRaw {
    #[serde(rename = "PatID")]
    patient_id: PatientId,
    #[serde(rename = "Sex")]
    sex: Sex,
    #[serde(rename = "YearOfBirth")]
    year_of_birth: u16,
    #[serde(rename = "RegStartDate")]
    registration_start: Option<NaiveDate>,
    #[serde(rename = "RegEndDate")]
    registration_end: Option<NaiveDate>,
}

/// A row in the patients dataset.
///
/// In this and the other datasets, `patient_id` always identifies the same
/// patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub sex: Sex,
    pub year_of_birth: u16,
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
}

impl From<PatientRaw> for Patient {
    fn from(from: PatientRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            sex: from.sex,
            year_of_birth: from.year_of_birth,
            registration_start: from.registration_start,
            registration_end: from.registration_end,
        }
    }
}

impl Patient {
    /// Did this patient have an active practice registration on `date`?
    ///
    /// A registration with no end date is still open.
    pub fn registered_on(&self, date: NaiveDate) -> bool {
        match self.registration_start {
            Some(start) => {
                start <= date && self.registration_end.map_or(true, |end| date < end)
            }
            None => false,
        }
    }
}

/// The parsed list of patients, with a pre-built index for the `patient_id`
/// field.
pub struct Patients {
    els: Arc<Vec<Patient>>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Patients {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let patients_raw: Vec<PatientRaw> = load_orig(path)?;
        Ok(Self::new(
            patients_raw.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&Patient> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = Patient> + '_ {
        self.els.iter().cloned()
    }

    pub fn filter(&self, f: impl Fn(&Patient) -> bool) -> Self {
        Patients::new(self.iter().filter(f).collect())
    }

    fn new(els: Vec<Patient>) -> Self {
        let mut this = Patients {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.patient_id, idx);
        }
    }
}

impl Deref for Patients {
    type Target = [Patient];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

#[derive(Debug, Deserialize)]
struct EventRaw {
    #[serde(rename = "PatID")]
    patient_id: PatientId,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "SnomedCode", deserialize_with = "maybe_snomed")]
    code: Option<SnomedCode>,
}

/// A row in the coded events dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub code: SnomedCode,
}

impl Event {
    fn from_raw(raw: EventRaw) -> Option<Self> {
        raw.code.map(|code| Event {
            patient_id: raw.patient_id,
            date: raw.date,
            code,
        })
    }
}

/// The parsed list of coded events, with a pre-built index for the
/// `patient_id` field.
///
/// Events are kept in the order they appear in the extract; that order is
/// part of the contract (it breaks ties between same-day events when
/// resolving the latest coded value).
pub struct Events {
    els: Arc<Vec<Event>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Events {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let els: Vec<EventRaw> = load_orig(path)?;
        let els: Vec<Event> = els.into_iter().filter_map(Event::from_raw).collect();
        Ok(Self::new(els))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    /// This patient's events, in extract order.
    pub fn events_for_patient(
        &self,
        patient_id: PatientId,
    ) -> impl Iterator<Item = &Event> + Clone + '_ {
        let evt_idxs = match self.id_idx.get(&patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(evt_idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent event patient_id index")
        }))
    }

    /// Iterate over events in this store.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.els.iter()
    }

    fn new(els: Vec<Event>) -> Self {
        let mut this = Events {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, event) in self.els.iter().enumerate() {
            self.id_idx
                .entry(event.patient_id)
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl Deref for Events {
    type Target = [Event];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a Events {
    type IntoIter = <&'a [Event] as IntoIterator>::IntoIter;
    type Item = &'a Event;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Event> for Events {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Event>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Deserialize)]
struct SusEthnicityRaw {
    #[serde(rename = "PatID")]
    patient_id: PatientId,
    #[serde(rename = "EthnicCategory", deserialize_with = "maybe_sus")]
    code: Option<SusCode>,
}

/// A row in the SUS ethnicity linkage: at most one letter per patient,
/// already resolved upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SusEthnicity {
    pub patient_id: PatientId,
    pub code: Option<SusCode>,
}

impl From<SusEthnicityRaw> for SusEthnicity {
    fn from(from: SusEthnicityRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            code: from.code,
        }
    }
}

/// The parsed SUS ethnicity linkage, with a pre-built index for the
/// `patient_id` field.
pub struct SusEthnicities {
    els: Vec<SusEthnicity>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl SusEthnicities {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let els: Vec<SusEthnicityRaw> = load_orig(path)?;
        Ok(Self::new(els.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    /// The letter recorded for a patient. Patients absent from the linkage
    /// and patients linked without a letter both count as having none.
    pub fn code_for(&self, id: PatientId) -> Option<SusCode> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)?.code
    }

    fn new(els: Vec<SusEthnicity>) -> Self {
        let mut this = Self {
            els,
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx = self
            .els
            .iter()
            .enumerate()
            .map(|(idx, el)| (el.patient_id, idx))
            .collect();
    }
}

impl Deref for SusEthnicities {
    type Target = [SusEthnicity];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl FromIterator<SusEthnicity> for SusEthnicities {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = SusEthnicity>,
    {
        Self::new(iter.into_iter().collect())
    }
}

// Sub-types

/// Sex is encoded 'M' or 'F'. No other values exist in the data. If another
/// value is added in the future, this will throw an error, forcing us to
/// handle the situation.
///
/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Sex {
    #[serde(rename = "M", alias = "m")]
    Male,
    #[serde(rename = "F", alias = "f")]
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("Male"),
            Sex::Female => f.write_str("Female"),
        }
    }
}

/// Load data into memory.
fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let path = output_path(path);
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        // it seems File::options().create_new(true) doesn't work on the server, so fall back to
        // checking for existence.
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    let path = output_path(path);
    check_extension(&path, "bin")?;

    inner(contents, &path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Load data into memory from the original database extract.
fn load_orig<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let path = orig_path(path);
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Note: No protection from escaping the root directory.
pub fn orig_path(input: impl AsRef<Path>) -> PathBuf {
    Path::new("../data/extract").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: impl AsRef<Path>) -> PathBuf {
    Path::new("../output").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn codelist_path(input: impl AsRef<Path>) -> PathBuf {
    Path::new("../codelists").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
