use chrono::NaiveDate;
use clap::Parser;
use ethnicity_harmonisation::{
    codelist_path, default_index_date, harmonise::harmonise, header, CategoryCodelist, Events,
    Patients, SusEthnicities,
};
use qu::ick_use::*;

#[derive(Parser)]
struct Opt {
    /// Patients must have an active practice registration on this date to
    /// enter the dataset. Defaults to 2020-03-31.
    #[clap(long)]
    index_date: Option<NaiveDate>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let index_date = opt.index_date.unwrap_or_else(default_index_date);

    let patients = Patients::load("patients.bin")?;
    let events = Events::load("events.bin")?;
    let sus = SusEthnicities::load("sus_ethnicity.bin")?;

    let codelist = codelist_path("ethnicity_snomed.csv");
    let six_category = CategoryCodelist::load(&codelist, "snomedcode", "Grouping_6")?;
    let sixteen_category = CategoryCodelist::load(&codelist, "snomedcode", "Grouping_16")?;
    event!(
        Level::INFO,
        "codelists loaded: {} codes (6-category), {} codes (16-category)",
        six_category.len(),
        sixteen_category.len()
    );

    header("Population");
    println!("patients in extract: {}", patients.len());
    let population = patients.filter(|pat| pat.registered_on(index_date));
    println!("registered on {}: {}", index_date, population.len());

    let records = harmonise(&population, &events, &sus, &six_category, &sixteen_category);
    records.save("ethnicity.bin")?;
    records.write_csv("dataset_ethnicity.csv")?;
    println!("derived ethnicity for {} patients", records.len());

    Ok(())
}
