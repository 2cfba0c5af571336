//! Derivation of the harmonised ethnicity dataset.
//!
//! Per patient this is a pure function of the patient's own rows: resolve the
//! GP-derived category at each granularity from the coded event history, look
//! up the SUS letter, and run both through the classification tables. Nothing
//! is shared between patients except the codelists and the tables, so the
//! population sweep is a parallel map.

use crate::{
    ethnicity::{Ethnicity16, Ethnicity5, SusCode, FIVE_LEVEL, SIXTEEN_LEVEL},
    load, save,
    snomed::CategoryCodelist,
    ArcStr, Events, PatientId, Patients, SusEthnicities,
};
use qu::ick_use::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, ops::Deref, path::Path};

/// The GP-recorded ethnicity category for one patient at one granularity.
///
/// Qualifying events are those whose code is in the codelist's domain; the
/// category of the latest qualifying event is returned, or `None` if the
/// patient has none. Several qualifying events can share the latest date, in
/// which case the last one in input order wins (`max_by_key` keeps the last
/// maximal element), so results do not depend on how the store was built up.
pub fn latest_category(
    events: &Events,
    patient_id: PatientId,
    codelist: &CategoryCodelist,
) -> Option<ArcStr> {
    events
        .events_for_patient(patient_id)
        .filter(|evt| codelist.contains(evt.code))
        .max_by_key(|evt| evt.date)
        .and_then(|evt| codelist.category_of(evt.code))
}

/// A row in the derived ethnicity dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthnicityRecord {
    pub patient_id: PatientId,
    /// GP-derived category in the 6-category codelist ("1".."5").
    pub gp_6_category: Option<ArcStr>,
    /// GP-derived category in the 16-category codelist ("1".."16").
    pub gp_16_category: Option<ArcStr>,
    /// The SUS administrative letter.
    pub sus_code: Option<SusCode>,
    pub combined_5: Ethnicity5,
    pub combined_16: Ethnicity16,
}

/// Derive the full set of ethnicity variables for one patient.
pub fn harmonise_patient(
    patient_id: PatientId,
    events: &Events,
    sus: &SusEthnicities,
    six_category: &CategoryCodelist,
    sixteen_category: &CategoryCodelist,
) -> EthnicityRecord {
    let gp_6 = latest_category(events, patient_id, six_category);
    let gp_16 = latest_category(events, patient_id, sixteen_category);
    let sus_code = sus.code_for(patient_id);
    EthnicityRecord {
        patient_id,
        combined_5: FIVE_LEVEL.classify(gp_6.as_deref(), sus_code),
        combined_16: SIXTEEN_LEVEL.classify(gp_16.as_deref(), sus_code),
        gp_6_category: gp_6,
        gp_16_category: gp_16,
        sus_code,
    }
}

/// Derive ethnicity variables for every patient in the population.
pub fn harmonise(
    patients: &Patients,
    events: &Events,
    sus: &SusEthnicities,
    six_category: &CategoryCodelist,
    sixteen_category: &CategoryCodelist,
) -> EthnicityRecords {
    let els = patients
        .par_iter()
        .map(|pat| harmonise_patient(pat.patient_id, events, sus, six_category, sixteen_category))
        .collect();
    EthnicityRecords::new(els)
}

/// The derived ethnicity dataset, with a pre-built index for the `patient_id`
/// field.
pub struct EthnicityRecords {
    els: Vec<EthnicityRecord>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl EthnicityRecords {
    fn new(els: Vec<EthnicityRecord>) -> Self {
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

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&EthnicityRecord> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EthnicityRecord> + '_ {
        self.els.iter()
    }

    /// Count records by any derived key, e.g. a category or a pair of them.
    pub fn count_by<K: Ord>(&self, f: impl Fn(&EthnicityRecord) -> K) -> BTreeMap<K, usize> {
        let mut map = BTreeMap::new();
        for el in self.els.iter() {
            *map.entry(f(el)).or_insert(0) += 1;
        }
        map
    }

    /// Cross-tabulate two derived keys: row key -> column key -> count.
    pub fn crosstab<R: Ord, C: Ord>(
        &self,
        row: impl Fn(&EthnicityRecord) -> R,
        column: impl Fn(&EthnicityRecord) -> C,
    ) -> BTreeMap<R, BTreeMap<C, usize>> {
        let mut map: BTreeMap<R, BTreeMap<C, usize>> = BTreeMap::new();
        for el in self.els.iter() {
            *map.entry(row(el)).or_default().entry(column(el)).or_insert(0) += 1;
        }
        map
    }

    /// Write the dataset as the tabular CSV artifact consumed downstream.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result {
        fn inner(this: &EthnicityRecords, path: &Path) -> Result {
            let mut out = csv::Writer::from_writer(io::BufWriter::new(fs::File::create(path)?));
            out.write_record([
                "patient_id",
                "ethnicity_6_category",
                "ethnicity_16_category",
                "ethnicity_sus",
                "ethnicity_gp_and_sus_5_category",
                "ethnicity_gp_and_sus_16_category",
            ])?;
            for el in this.els.iter() {
                out.write_record([
                    el.patient_id.to_string(),
                    el.gp_6_category.as_deref().unwrap_or("").to_string(),
                    el.gp_16_category.as_deref().unwrap_or("").to_string(),
                    el.sus_code.map(|code| code.to_string()).unwrap_or_default(),
                    el.combined_5.label().to_string(),
                    el.combined_16.label().to_string(),
                ])?;
            }
            out.flush()?;
            Ok(())
        }

        let path = path.as_ref();
        let path = crate::output_path(path);
        crate::check_extension(&path, "csv")?;
        inner(self, &path)
            .with_context(|| format!("unable to write dataset to \"{}\"", path.display()))
    }
}

impl Deref for EthnicityRecords {
    type Target = [EthnicityRecord];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Event, SusEthnicity};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(patient_id: PatientId, date_: NaiveDate, code: &str) -> Event {
        Event {
            patient_id,
            date: date_,
            code: code.parse().unwrap(),
        }
    }

    // three codes, categories 1/2/2 in a two-category scheme
    fn codelist() -> CategoryCodelist {
        [
            ("123456789", "1"),
            ("234567890", "2"),
            ("345678901", "2"),
        ]
        .into_iter()
        .map(|(code, cat)| (code.parse().unwrap(), ArcStr::from(cat)))
        .collect()
    }

    #[test]
    fn latest_qualifying_event_wins() {
        let events = Events::from_iter([
            event(1, date(2018, 1, 1), "234567890"),
            event(1, date(2019, 6, 30), "123456789"),
            event(1, date(2019, 1, 1), "234567890"),
        ]);
        let got = latest_category(&events, 1, &codelist());
        assert_eq!(got.as_deref(), Some("1"));
    }

    #[test]
    fn ties_resolve_to_the_last_input_row() {
        let day = date(2020, 3, 1);
        let events = Events::from_iter([
            event(1, day, "123456789"),
            // other patients' rows do not disturb the ordering
            event(2, day, "234567890"),
            event(1, day, "345678901"),
        ]);
        assert_eq!(latest_category(&events, 1, &codelist()).as_deref(), Some("2"));
        assert_eq!(latest_category(&events, 2, &codelist()).as_deref(), Some("2"));
    }

    #[test]
    fn non_qualifying_events_do_not_count() {
        let events = Events::from_iter([
            event(1, date(2021, 1, 1), "999999999"),
            event(1, date(2015, 1, 1), "123456789"),
            // patient 3 only has codes outside the codelist
            event(3, date(2021, 1, 1), "999999999"),
        ]);
        assert_eq!(latest_category(&events, 1, &codelist()).as_deref(), Some("1"));
        assert_eq!(latest_category(&events, 3, &codelist()), None);
        assert_eq!(latest_category(&events, 4, &codelist()), None);
    }

    #[test]
    fn gp_record_beats_sus_and_sus_fills_gaps() {
        // 6-category codelist: code -> "3"; 16-category: same code -> "11"
        let six: CategoryCodelist = [("123456789".parse().unwrap(), ArcStr::from("3"))]
            .into_iter()
            .collect();
        let sixteen: CategoryCodelist = [("123456789".parse().unwrap(), ArcStr::from("11"))]
            .into_iter()
            .collect();
        let events = Events::from_iter([event(1, date(2019, 1, 1), "123456789")]);
        let sus = SusEthnicities::from_iter([
            SusEthnicity { patient_id: 1, code: Some("M".parse().unwrap()) },
            SusEthnicity { patient_id: 2, code: Some("M".parse().unwrap()) },
        ]);

        // patient 1 has a GP record; the conflicting letter is ignored
        let record = harmonise_patient(1, &events, &sus, &six, &sixteen);
        assert_eq!(record.combined_5, Ethnicity5::AsianOrAsianBritish);
        assert_eq!(record.combined_16, Ethnicity16::OtherAsian);

        // patient 2 has no GP record; the letter decides
        let record = harmonise_patient(2, &events, &sus, &six, &sixteen);
        assert_eq!(record.gp_6_category, None);
        assert_eq!(record.combined_5, Ethnicity5::BlackOrBlackBritish);
        assert_eq!(record.combined_16, Ethnicity16::Caribbean);

        // patient 3 has nothing at all
        let record = harmonise_patient(3, &events, &sus, &six, &sixteen);
        assert_eq!(record.combined_5, Ethnicity5::Missing);
        assert_eq!(record.combined_16, Ethnicity16::Missing);
    }
}
