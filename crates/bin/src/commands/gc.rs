//! Orphan garbage collection command.

use aletheia_authority::person::Person;

use crate::output::OutputFormat;
use crate::store::Store;

/// Run the `gc` command
pub fn run(store: &Store, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let mut txn = store.manager.begin()?;
    let deleted = Person::delete_old_orphans(&mut txn)?;
    txn.commit()?;
    if !deleted.is_empty() {
        store.save()?;
    }

    match format {
        OutputFormat::Human => {
            println!(
                "Deleted {} orphan person(s) older than {} days",
                deleted.len(),
                store.manager.config().orphan_grace_period_days
            );
            for uuid in &deleted {
                println!("  {uuid}");
            }
        }
        OutputFormat::Json => {
            let uuids: Vec<String> = deleted.iter().map(ToString::to_string).collect();
            println!("{}", serde_json::to_string(&serde_json::json!({ "deleted": uuids }))?);
        }
    }
    Ok(())
}
