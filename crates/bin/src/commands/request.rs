//! Signature request commands.

use std::collections::BTreeMap;

use aletheia_authority::request::PackedSignatureRequest;

use crate::cli::RequestInspectArgs;
use crate::output::{OutputFormat, cell, print_table};

/// Run the `request inspect` command
///
/// Only decodes the file; nothing is registered in the store.
pub fn inspect(
    args: &RequestInspectArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&args.file)?;
    let request = PackedSignatureRequest::from_bytes(&bytes)?;
    let records = request.records()?;
    tracing::debug!(
        "Decoded {} records from {}",
        records.len(),
        args.file.display()
    );

    let path: Vec<String> = request
        .context_uuid_path
        .iter()
        .map(ToString::to_string)
        .collect();
    match format {
        OutputFormat::Human => {
            println!("Request:      {}", request.uuid);
            println!("Created:      {}", request.creation_date.to_rfc3339());
            println!("Packed:       {}", request.packing_date.to_rfc3339());
            println!("Context path: {}", path.join(" / "));
            println!(
                "Root signature: {}",
                cell(request.root_context_signature_uuid)
            );
            println!("Dependencies: {}", request.dependency_uuids.len());
            println!("Data:         {} bytes", request.data.len());
            println!();

            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for record in &records {
                *counts.entry(record.kind()).or_default() += 1;
            }
            let summary: Vec<Vec<String>> = counts
                .iter()
                .map(|(kind, count)| vec![kind.to_string(), count.to_string()])
                .collect();
            print_table(&["RECORD", "COUNT"], &summary);
            println!();

            let rows: Vec<Vec<String>> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    vec![
                        index.to_string(),
                        record.kind().to_string(),
                        record.subject().to_string(),
                    ]
                })
                .collect();
            print_table(&["#", "RECORD", "SUBJECT"], &rows);
        }
        OutputFormat::Json => {
            let entries: Vec<_> = records
                .iter()
                .map(|record| {
                    serde_json::json!({
                        "kind": record.kind(),
                        "subject": record.subject().to_string(),
                    })
                })
                .collect();
            let value = serde_json::json!({
                "uuid": request.uuid.to_string(),
                "creation_date": request.creation_date.to_rfc3339(),
                "packing_date": request.packing_date.to_rfc3339(),
                "context_uuid_path": path,
                "root_context_signature_uuid":
                    request.root_context_signature_uuid.map(|uuid| uuid.to_string()),
                "dependency_uuids": request
                    .dependency_uuids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
                "records": entries,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }
    Ok(())
}
