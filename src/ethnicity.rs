//! Harmonised ethnicity classification.
//!
//! Ethnicity is recorded in two places that rarely agree on coverage: the GP
//! record, as SNOMED CT coded events mapped through a codelist to a category
//! identifier, and the SUS hospital administrative data, as a single letter.
//! Each patient gets a combined category per granularity (a broad 5-category
//! scheme and the census-style 16-category scheme): the GP-derived category
//! when one exists, otherwise whichever category the SUS letter belongs to,
//! otherwise "Missing".
//!
//! The mapping is written as a data table (one row per output category,
//! carrying the GP category identifier and the SUS letters that fall back to
//! it), evaluated by a single first-match scan shared by both granularities.
//! The letter sets of a table must not overlap, so that the fallback is a
//! function of the letter; [`RuleTable::new`] checks this when the table is
//! first used.

use once_cell::sync::Lazy;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The ethnicity letters used in hospital episode data.
///
/// The operative alphabet is A-S with I, O and Q unused (they are too easily
/// misread for other letters or digits). Letters outside it still parse:
/// unrecognised values are data, and simply match no classification rule.
pub const SUS_LETTERS: &str = "ABCDEFGHJKLMNPRS";

/// A single-letter ethnicity code from the SUS administrative linkage.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SusCode(u8);

impl SusCode {
    pub fn new(ch: char) -> Result<Self> {
        ensure!(
            ch.is_ascii_alphabetic(),
            "ethnicity codes are single letters, found {:?}",
            ch
        );
        Ok(SusCode(ch.to_ascii_uppercase() as u8))
    }

    pub fn from_str(v: &str) -> Result<Self> {
        let v = v.trim();
        let mut chars = v.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Self::new(ch),
            _ => bail!("ethnicity codes are single letters, found \"{}\"", v),
        }
    }

    pub fn as_char(self) -> char {
        char::from(self.0)
    }

    /// Whether this letter is one the classification tables assign a meaning.
    pub fn is_operative(self) -> bool {
        SUS_LETTERS.contains(self.as_char())
    }
}

impl fmt::Debug for SusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl std::str::FromStr for SusCode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Serialize for SusCode {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if s.is_human_readable() {
            s.collect_str(&self.as_char())
        } else {
            s.serialize_u8(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SusCode {
    fn deserialize<D>(deserializer: D) -> Result<SusCode, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(SusCodeVisitor)
        } else {
            deserializer.deserialize_u8(SusCodeVisitor)
        }
    }
}

struct SusCodeVisitor;

impl<'de> serde::de::Visitor<'de> for SusCodeVisitor {
    type Value = SusCode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a single-letter ethnicity code")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        SusCode::from_str(v).map_err(serde::de::Error::custom)
    }

    fn visit_u8<E>(self, v: u8) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        SusCode::new(char::from(v)).map_err(serde::de::Error::custom)
    }
}

/// The broad 5-category ethnicity scheme.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum Ethnicity5 {
    White,
    Mixed,
    AsianOrAsianBritish,
    BlackOrBlackBritish,
    ChineseOrOtherEthnicGroups,
    Missing,
}

impl Ethnicity5 {
    /// The reporting label for this category.
    pub fn label(self) -> &'static str {
        use Ethnicity5::*;
        match self {
            White => "White",
            Mixed => "Mixed",
            AsianOrAsianBritish => "Asian or Asian British",
            BlackOrBlackBritish => "Black or Black British",
            ChineseOrOtherEthnicGroups => "Chinese or Other Ethnic Groups",
            Missing => "Missing",
        }
    }
}

impl fmt::Display for Ethnicity5 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The census-style 16-category ethnicity scheme.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum Ethnicity16 {
    WhiteBritish,
    WhiteIrish,
    OtherWhite,
    MixedWhiteBlackCaribbean,
    MixedWhiteBlackAfrican,
    MixedWhiteAsian,
    OtherMixed,
    Indian,
    Pakistani,
    Bangladeshi,
    OtherAsian,
    Caribbean,
    African,
    OtherBlack,
    Chinese,
    OtherEthnicGroup,
    Missing,
}

impl Ethnicity16 {
    /// The reporting label for this category.
    pub fn label(self) -> &'static str {
        use Ethnicity16::*;
        match self {
            WhiteBritish => "White - British",
            WhiteIrish => "White - Irish",
            OtherWhite => "White - Any other White background",
            MixedWhiteBlackCaribbean => "Mixed - White and Black Caribbean",
            MixedWhiteBlackAfrican => "Mixed - White and Black African",
            MixedWhiteAsian => "Mixed - White and Asian",
            OtherMixed => "Mixed - Any other mixed background",
            Indian => "Asian or Asian British - Indian",
            Pakistani => "Asian or Asian British - Pakistani",
            Bangladeshi => "Asian or Asian British - Bangladeshi",
            OtherAsian => "Asian or Asian British - Any other Asian background",
            Caribbean => "Black or Black British - Caribbean",
            African => "Black or Black British - African",
            OtherBlack => "Black or Black British - Any other Black background",
            Chinese => "Other Ethnic Groups - Chinese",
            OtherEthnicGroup => "Other Ethnic Groups - Any other ethnic group",
            Missing => "Missing",
        }
    }
}

impl fmt::Display for Ethnicity16 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of a classification table.
pub struct Rule<C: 'static> {
    /// The GP-derived category identifier that maps to this category.
    pub gp_category: &'static str,
    /// SUS letters that fall back to this category when there is no
    /// GP-derived value at all.
    pub sus_codes: &'static str,
    pub category: C,
}

impl<C> Rule<C> {
    fn matches(&self, gp: Option<&str>, sus: Option<SusCode>) -> bool {
        match gp {
            // A GP-derived value settles the matter; the letter is never
            // consulted, even when it points somewhere else.
            Some(id) => id == self.gp_category,
            None => matches!(sus, Some(code) if self.sus_codes.contains(code.as_char())),
        }
    }
}

/// An ordered classification table with a default.
///
/// Rules are tried top to bottom and the first match wins. The letter sets
/// are pairwise disjoint (checked in [`RuleTable::new`]), so at most one rule
/// can match any input and the table denotes a total function from
/// `(Option<gp category>, Option<letter>)` to `C`.
pub struct RuleTable<C: 'static> {
    rules: &'static [Rule<C>],
    default: C,
}

impl<C: Copy> RuleTable<C> {
    /// Panics if two rules share a GP category identifier or a SUS letter.
    /// The tables are static data, so this is a programmer error.
    fn new(rules: &'static [Rule<C>], default: C) -> Self {
        for (i, rule) in rules.iter().enumerate() {
            for other in &rules[i + 1..] {
                assert!(
                    rule.gp_category != other.gp_category,
                    "GP category \"{}\" appears in two rules",
                    rule.gp_category,
                );
                assert!(
                    !rule.sus_codes.chars().any(|ch| other.sus_codes.contains(ch)),
                    "rules for GP categories \"{}\" and \"{}\" share a SUS letter",
                    rule.gp_category,
                    other.gp_category,
                );
            }
        }
        Self { rules, default }
    }

    /// Classify one patient's pair of source values.
    pub fn classify(&self, gp: Option<&str>, sus: Option<SusCode>) -> C {
        self.rules
            .iter()
            .find(|rule| rule.matches(gp, sus))
            .map(|rule| rule.category)
            .unwrap_or(self.default)
    }

    pub fn rules(&self) -> &'static [Rule<C>] {
        self.rules
    }

    pub fn default(&self) -> C {
        self.default
    }

    /// All SUS letters the table assigns a meaning, in rule order.
    pub fn letters(&self) -> impl Iterator<Item = char> + '_ {
        self.rules.iter().flat_map(|rule| rule.sus_codes.chars())
    }
}

/// The combined 5-category classification.
pub static FIVE_LEVEL: Lazy<RuleTable<Ethnicity5>> = Lazy::new(|| {
    use Ethnicity5::*;
    RuleTable::new(
        &[
            Rule { gp_category: "1", sus_codes: "ABC", category: White },
            Rule { gp_category: "2", sus_codes: "DEFG", category: Mixed },
            Rule { gp_category: "3", sus_codes: "HJKL", category: AsianOrAsianBritish },
            Rule { gp_category: "4", sus_codes: "MNP", category: BlackOrBlackBritish },
            Rule { gp_category: "5", sus_codes: "RS", category: ChineseOrOtherEthnicGroups },
        ],
        Missing,
    )
});

/// The combined 16-category classification.
///
/// Each category owns exactly one SUS letter, and grouping the letters by
/// broad category reproduces the 5-category letter sets above.
pub static SIXTEEN_LEVEL: Lazy<RuleTable<Ethnicity16>> = Lazy::new(|| {
    use Ethnicity16::*;
    RuleTable::new(
        &[
            Rule { gp_category: "1", sus_codes: "A", category: WhiteBritish },
            Rule { gp_category: "2", sus_codes: "B", category: WhiteIrish },
            Rule { gp_category: "3", sus_codes: "C", category: OtherWhite },
            Rule { gp_category: "4", sus_codes: "D", category: MixedWhiteBlackCaribbean },
            Rule { gp_category: "5", sus_codes: "E", category: MixedWhiteBlackAfrican },
            Rule { gp_category: "6", sus_codes: "F", category: MixedWhiteAsian },
            Rule { gp_category: "7", sus_codes: "G", category: OtherMixed },
            Rule { gp_category: "8", sus_codes: "H", category: Indian },
            Rule { gp_category: "9", sus_codes: "J", category: Pakistani },
            Rule { gp_category: "10", sus_codes: "K", category: Bangladeshi },
            Rule { gp_category: "11", sus_codes: "L", category: OtherAsian },
            Rule { gp_category: "12", sus_codes: "M", category: Caribbean },
            Rule { gp_category: "13", sus_codes: "N", category: African },
            Rule { gp_category: "14", sus_codes: "P", category: OtherBlack },
            Rule { gp_category: "15", sus_codes: "R", category: Chinese },
            Rule { gp_category: "16", sus_codes: "S", category: OtherEthnicGroup },
        ],
        Missing,
    )
});

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    fn sus(ch: char) -> Option<SusCode> {
        Some(SusCode::new(ch).unwrap())
    }

    #[test]
    fn letter_sets_are_pairwise_disjoint() {
        fn check<C: Copy>(table: &RuleTable<C>) {
            for (i, rule) in table.rules().iter().enumerate() {
                for other in &table.rules()[i + 1..] {
                    assert!(
                        !rule.sus_codes.chars().any(|ch| other.sus_codes.contains(ch)),
                        "rules \"{}\" and \"{}\" overlap",
                        rule.gp_category,
                        other.gp_category,
                    );
                }
            }
        }
        check(&FIVE_LEVEL);
        check(&SIXTEEN_LEVEL);
    }

    #[test]
    fn tables_consume_the_same_alphabet() {
        let five: BTreeSet<char> = FIVE_LEVEL.letters().collect();
        let sixteen: BTreeSet<char> = SIXTEEN_LEVEL.letters().collect();
        let operative: BTreeSet<char> = SUS_LETTERS.chars().collect();
        assert_eq!(five, operative);
        assert_eq!(sixteen, operative);
    }

    #[test]
    fn sixteen_level_letters_are_one_to_one() {
        assert!(SIXTEEN_LEVEL
            .rules()
            .iter()
            .all(|rule| rule.sus_codes.len() == 1));
        assert_eq!(SIXTEEN_LEVEL.letters().count(), 16);
    }

    #[test]
    fn gp_value_always_wins() {
        // every (category, letter) pairing, including deliberately
        // conflicting ones, classifies the same as (category, no letter)
        for rule in FIVE_LEVEL.rules() {
            let want = FIVE_LEVEL.classify(Some(rule.gp_category), None);
            for ch in 'A'..='Z' {
                assert_eq!(FIVE_LEVEL.classify(Some(rule.gp_category), sus(ch)), want);
            }
        }
        for rule in SIXTEEN_LEVEL.rules() {
            let want = SIXTEEN_LEVEL.classify(Some(rule.gp_category), None);
            for ch in 'A'..='Z' {
                assert_eq!(SIXTEEN_LEVEL.classify(Some(rule.gp_category), sus(ch)), want);
            }
        }
    }

    #[test]
    fn letters_fall_back_to_their_rule() {
        for rule in FIVE_LEVEL.rules() {
            for ch in rule.sus_codes.chars() {
                assert_eq!(FIVE_LEVEL.classify(None, sus(ch)), rule.category);
            }
        }
        for rule in SIXTEEN_LEVEL.rules() {
            for ch in rule.sus_codes.chars() {
                assert_eq!(SIXTEEN_LEVEL.classify(None, sus(ch)), rule.category);
            }
        }
    }

    #[test]
    fn unmatched_inputs_are_missing() {
        assert_eq!(FIVE_LEVEL.classify(None, None), Ethnicity5::Missing);
        assert_eq!(SIXTEEN_LEVEL.classify(None, None), Ethnicity16::Missing);
        // letters outside the operative alphabet
        assert_eq!(FIVE_LEVEL.classify(None, sus('Z')), Ethnicity5::Missing);
        assert_eq!(FIVE_LEVEL.classify(None, sus('I')), Ethnicity5::Missing);
        assert_eq!(SIXTEEN_LEVEL.classify(None, sus('Q')), Ethnicity16::Missing);
        // a category identifier no rule owns
        assert_eq!(FIVE_LEVEL.classify(Some("9"), sus('A')), Ethnicity5::Missing);
    }

    #[test]
    fn every_input_combination_classifies() {
        // all of {absent, "1".."5"} x {absent, A..Z} produce a category, and
        // a present GP category never produces "Missing"
        let gps = [None, Some("1"), Some("2"), Some("3"), Some("4"), Some("5")];
        let mut letters: Vec<Option<SusCode>> = vec![None];
        letters.extend(('A'..='Z').map(sus));
        for letter in letters {
            for gp in gps {
                let got = FIVE_LEVEL.classify(gp, letter);
                if gp.is_some() {
                    assert_ne!(got, Ethnicity5::Missing);
                }
            }
        }
    }

    #[test]
    fn five_level_scenarios() {
        use Ethnicity5::*;
        assert_eq!(FIVE_LEVEL.classify(Some("1"), None), White);
        assert_eq!(FIVE_LEVEL.classify(None, sus('D')), Mixed);
        assert_eq!(FIVE_LEVEL.classify(None, sus('Z')), Missing);
        // GP category 3 with a letter from category 4's set
        assert_eq!(FIVE_LEVEL.classify(Some("3"), sus('M')), AsianOrAsianBritish);
    }

    #[test]
    fn sixteen_level_scenarios() {
        use Ethnicity16::*;
        assert_eq!(SIXTEEN_LEVEL.classify(None, sus('H')), Indian);
        assert_eq!(SIXTEEN_LEVEL.classify(Some("9"), None), Pakistani);
        assert_eq!(SIXTEEN_LEVEL.classify(Some("16"), sus('A')), OtherEthnicGroup);
    }

    #[test]
    fn sus_codes_parse_and_display() {
        let code: SusCode = "b".parse().unwrap();
        assert_eq!(code.as_char(), 'B');
        assert_eq!(code.to_string(), "B");
        assert!(code.is_operative());
        assert!(!SusCode::new('Q').unwrap().is_operative());
        assert!(SusCode::from_str("AB").is_err());
        assert!(SusCode::from_str("3").is_err());
        assert!(SusCode::from_str("").is_err());
    }
}
