use ethnicity_harmonisation::{
    ethnicity::{FIVE_LEVEL, SIXTEEN_LEVEL},
    header, EthnicityRecords, Patients,
};
use qu::ick_use::*;
use std::collections::{BTreeMap, BTreeSet};
use term_data_table::{Cell, Row, Table};

#[qu::ick]
pub fn main() -> Result {
    let records = EthnicityRecords::load("ethnicity.bin")?;
    let patients = Patients::load("patients.bin")?;
    let total = records.len();

    header("GP-recorded 6-category ethnicity");
    let counts = records.count_by(|r| r.gp_6_category.clone());
    println!(
        "{}",
        count_table(
            counts
                .iter()
                .map(|(cat, n)| (cat.as_deref().unwrap_or("missing").to_string(), *n)),
            total,
        )
    );

    header("GP-recorded 16-category ethnicity");
    let counts = records.count_by(|r| r.gp_16_category.clone());
    println!(
        "{}",
        count_table(
            counts
                .iter()
                .map(|(cat, n)| (cat.as_deref().unwrap_or("missing").to_string(), *n)),
            total,
        )
    );

    header("SUS-recorded ethnicity");
    let counts = records.count_by(|r| r.sus_code);
    println!(
        "{}",
        count_table(
            counts.iter().map(|(code, n)| {
                let label = match code {
                    Some(code) => code.to_string(),
                    None => "missing".to_string(),
                };
                (label, *n)
            }),
            total,
        )
    );

    header("Combined 5-category ethnicity");
    let counts = records.count_by(|r| r.combined_5);
    // make sure all categories are included, even at zero
    let categories = FIVE_LEVEL
        .rules()
        .iter()
        .map(|rule| rule.category)
        .chain([FIVE_LEVEL.default()]);
    println!(
        "{}",
        count_table(
            categories.map(|cat| {
                (
                    cat.label().to_string(),
                    counts.get(&cat).copied().unwrap_or(0),
                )
            }),
            total,
        )
    );

    header("Combined 16-category ethnicity");
    let counts = records.count_by(|r| r.combined_16);
    let categories = SIXTEEN_LEVEL
        .rules()
        .iter()
        .map(|rule| rule.category)
        .chain([SIXTEEN_LEVEL.default()]);
    println!(
        "{}",
        count_table(
            categories.map(|cat| {
                (
                    cat.label().to_string(),
                    counts.get(&cat).copied().unwrap_or(0),
                )
            }),
            total,
        )
    );

    header("Combined 5-category ethnicity by SUS letter");
    let xtab = records.crosstab(
        |r| r.combined_5,
        |r| match r.sus_code {
            Some(code) => code.to_string(),
            None => "missing".to_string(),
        },
    );
    println!(
        "{}",
        crosstab_table(
            xtab.into_iter()
                .map(|(row, cols)| (row.label().to_string(), cols))
                .collect()
        )
    );

    header("Combined 5-category ethnicity by sex");
    let xtab = records.crosstab(
        |r| r.combined_5,
        |r| match patients.find_by_id(r.patient_id) {
            Some(pat) => pat.sex.to_string(),
            None => "unknown".to_string(),
        },
    );
    println!(
        "{}",
        crosstab_table(
            xtab.into_iter()
                .map(|(row, cols)| (row.label().to_string(), cols))
                .collect()
        )
    );

    Ok(())
}

fn count_table(counts: impl IntoIterator<Item = (String, usize)>, total: usize) -> Table<'static> {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Category"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (label, count) in counts {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    count as f64 / total as f64 * 100.
                ))),
        );
    }
    table
}

fn crosstab_table(xtab: BTreeMap<String, BTreeMap<String, usize>>) -> Table<'static> {
    let columns: BTreeSet<&String> = xtab.values().flat_map(|cols| cols.keys()).collect();

    let mut head = Row::new().with_cell(Cell::from(""));
    for column in columns.iter() {
        head = head.with_cell(Cell::from(column.to_string()));
    }
    let mut table = Table::new().with_row(head);

    for (row_label, cols) in xtab.iter() {
        let mut row = Row::new().with_cell(Cell::from(row_label.to_string()));
        for column in columns.iter() {
            let count = cols.get(*column).copied().unwrap_or(0);
            row = row.with_cell(Cell::from(count.to_string()));
        }
        table.add_row(row);
    }
    table
}
