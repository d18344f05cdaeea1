//! Identity commands: create and list persons.

use aletheia_authority::{
    backend::PersonStore,
    person::PrivatePerson,
    signatory::{KeyStorage, Signatory},
};

use crate::cli::IdentityCreateArgs;
use crate::output::{OutputFormat, cell, print_table};
use crate::store::Store;

/// Run the `identity create` command
pub fn create(
    store: &Store,
    args: &IdentityCreateArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let encrypt = args.encrypt || store.manager.config().encrypt_new_signatories;
    if encrypt && !store.manager.secrets().has_secret() {
        return Err("Encrypted identities need --passphrase or ALETHEIA_PASSPHRASE".into());
    }
    let storage = if encrypt {
        KeyStorage::Encrypted
    } else {
        KeyStorage::Plain
    };

    let mut txn = store.manager.begin()?;
    let person = PrivatePerson::create(
        &mut txn,
        storage,
        &args.nick,
        args.name.as_deref(),
        args.email.as_deref(),
    )?;
    txn.commit()?;
    store.save()?;
    tracing::info!("Created identity {} ({})", person.person.nick, person.uuid());

    match format {
        OutputFormat::Human => println!("{}", person.uuid()),
        OutputFormat::Json => {
            let value = serde_json::json!({
                "uuid": person.uuid().to_string(),
                "nick": person.person.nick,
                "encrypted": encrypt,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }
    Ok(())
}

/// Run the `identity list` command
pub fn list(store: &Store, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let txn = store.manager.begin()?;
    let mut persons = txn.all_persons()?;
    persons.sort_by(|a, b| a.nick.cmp(&b.nick).then_with(|| a.uuid.cmp(&b.uuid)));

    let mut private = Vec::with_capacity(persons.len());
    for person in &persons {
        private.push(Signatory::is_private(&*txn, person.uuid)?);
    }

    match format {
        OutputFormat::Human => {
            if persons.is_empty() {
                println!("No persons found.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = persons
                .iter()
                .zip(&private)
                .map(|(person, private)| {
                    vec![
                        person.uuid.to_string(),
                        person.nick.clone(),
                        cell(person.name.as_deref()),
                        if *private { "yes" } else { "no" }.to_string(),
                        cell(person.orphan_since),
                    ]
                })
                .collect();
            print_table(&["UUID", "NICK", "NAME", "PRIVATE", "ORPHAN SINCE"], &rows);
        }
        OutputFormat::Json => {
            let entries: Vec<_> = persons
                .iter()
                .zip(&private)
                .map(|(person, private)| {
                    serde_json::json!({
                        "uuid": person.uuid.to_string(),
                        "nick": person.nick,
                        "name": person.name,
                        "email": person.email,
                        "private": private,
                        "orphan_since": person.orphan_since.map(|date| date.to_rfc3339()),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string(&entries)?);
        }
    }
    Ok(())
}
