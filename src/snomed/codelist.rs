use crate::{snomed::SnomedCode, ArcStr};
use qu::ick_use::*;
use std::{collections::BTreeMap, fs, io, path::Path, sync::Arc};

/// A codelist partitioning SNOMED CT codes into named categories.
///
/// Loaded from a CSV resource with one row per code, keyed by a named code
/// column and a named category column. The same resource file can back
/// several codelists at different granularities, one per category column.
#[derive(Debug, Default, Clone)]
pub struct CategoryCodelist {
    categories: Arc<BTreeMap<SnomedCode, ArcStr>>,
}

impl CategoryCodelist {
    fn new(categories: BTreeMap<SnomedCode, ArcStr>) -> Self {
        Self {
            categories: Arc::new(categories),
        }
    }

    /// Load a codelist from a CSV file, using the named code and category
    /// columns.
    pub fn load(
        path: impl AsRef<Path>,
        code_column: &str,
        category_column: &str,
    ) -> Result<Self> {
        fn inner(path: &Path, code_column: &str, category_column: &str) -> Result<CategoryCodelist> {
            let reader = fs::File::open(path)?;
            CategoryCodelist::from_reader(reader, code_column, category_column)
        }

        let path = path.as_ref();
        inner(path, code_column, category_column)
            .with_context(|| format!("loading codelist from file \"{}\"", path.display()))
    }

    /// Load a codelist from any CSV source.
    ///
    /// Rows whose category cell is empty or "0" are unclassified and are left
    /// out of the codelist domain.
    pub fn from_reader(
        reader: impl io::Read,
        code_column: &str,
        category_column: &str,
    ) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?;
        let code_idx = headers
            .iter()
            .position(|h| h == code_column)
            .ok_or_else(|| format_err!("codelist has no \"{}\" column", code_column))?;
        let category_idx = headers
            .iter()
            .position(|h| h == category_column)
            .ok_or_else(|| format_err!("codelist has no \"{}\" column", category_column))?;

        let mut categories = BTreeMap::new();
        let mut unclassified = 0usize;
        for record in csv.into_records() {
            let record = record?;
            let code = record
                .get(code_idx)
                .ok_or_else(|| format_err!("codelist row too short"))?;
            let code = SnomedCode::from_str(code)?;
            let category = record
                .get(category_idx)
                .ok_or_else(|| format_err!("codelist row too short"))?
                .trim();
            if category.is_empty() || category == "0" {
                unclassified += 1;
                continue;
            }
            categories.insert(code, ArcStr::from(category));
        }
        if unclassified > 0 {
            event!(
                Level::WARN,
                "skipped {} unclassified codelist rows",
                unclassified
            );
        }
        Ok(Self::new(categories))
    }

    /// Is the code a member of this codelist's domain?
    pub fn contains(&self, code: SnomedCode) -> bool {
        self.categories.contains_key(&code)
    }

    /// The category a code maps to, if it is in the domain.
    pub fn category_of(&self, code: SnomedCode) -> Option<ArcStr> {
        self.categories.get(&code).cloned()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SnomedCode, &ArcStr)> + '_ {
        self.categories.iter().map(|(code, cat)| (*code, cat))
    }
}

impl FromIterator<(SnomedCode, ArcStr)> for CategoryCodelist {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (SnomedCode, ArcStr)>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::CategoryCodelist;

    const CODELIST: &str = "\
snomedcode,Grouping_6,Grouping_16
494131000000105,1,3
92491000000104,1,1
92501000000105,2,4
765288000,0,0
";

    #[test]
    fn loads_named_columns() {
        let six =
            CategoryCodelist::from_reader(CODELIST.as_bytes(), "snomedcode", "Grouping_6").unwrap();
        let sixteen =
            CategoryCodelist::from_reader(CODELIST.as_bytes(), "snomedcode", "Grouping_16")
                .unwrap();
        let code = "494131000000105".parse().unwrap();
        assert_eq!(six.category_of(code).as_deref(), Some("1"));
        assert_eq!(sixteen.category_of(code).as_deref(), Some("3"));
    }

    #[test]
    fn unclassified_rows_are_not_in_the_domain() {
        let six =
            CategoryCodelist::from_reader(CODELIST.as_bytes(), "snomedcode", "Grouping_6").unwrap();
        assert_eq!(six.len(), 3);
        assert!(!six.contains("765288000".parse().unwrap()));
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = CategoryCodelist::from_reader(CODELIST.as_bytes(), "snomedcode", "Grouping_5")
            .unwrap_err();
        assert!(err.to_string().contains("Grouping_5"));
    }
}
