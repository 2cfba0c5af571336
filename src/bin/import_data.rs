use ethnicity_harmonisation::{Events, Patients, SusEthnicities};
use qu::ick_use::*;

#[qu::ick]
fn main() -> Result {
    let patients = Patients::load_orig("patients.csv")?;
    patients.save("patients.bin")?;

    let events = Events::load_orig("clinical_events.csv")?;
    events.save("events.bin")?;

    let sus = SusEthnicities::load_orig("sus_ethnicity.csv")?;
    sus.save("sus_ethnicity.bin")?;

    println!("imported {} patients", patients.len());
    println!("imported {} coded events", events.len());
    println!("imported {} SUS ethnicity rows", sus.len());
    Ok(())
}
