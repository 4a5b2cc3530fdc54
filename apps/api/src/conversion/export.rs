//! Packaged export: mapping CSV, diagnostics CSV, the original inputs and a
//! README, zipped into one archive.

use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::conversion::pipeline::{ConversionInputs, ConversionOutcome};
use crate::diagnostics::DiagnosticEntry;

pub const ARCHIVE_NAME: &str = "conga_to_box_conversion.zip";
pub const MAPPING_CSV_NAME: &str = "conga_to_box_mapping.csv";
pub const DIAGNOSTICS_CSV_NAME: &str = "conversion_diagnostics.csv";
const README_NAME: &str = "README.txt";

/// Serializes the diagnostic log in chronological order.
pub fn diagnostics_csv(entries: &[DiagnosticEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["recorded_at", "stage", "severity", "error_kind", "message", "context"])?;
    for entry in entries {
        writer.write_record([
            entry.recorded_at.to_rfc3339().as_str(),
            entry.stage.as_str(),
            entry.severity.as_str(),
            entry.error_kind.map(|k| k.as_str()).unwrap_or(""),
            entry.message.as_str(),
            entry.context.as_deref().unwrap_or(""),
        ])?;
    }
    let bytes = writer.into_inner().context("Failed to flush diagnostics CSV")?;
    String::from_utf8(bytes).context("Diagnostics CSV is not valid UTF-8")
}

/// Builds the export archive for a finished run.
pub fn build_export_archive(
    outcome: &ConversionOutcome,
    inputs: &ConversionInputs,
) -> Result<Vec<u8>> {
    let template_name = format!("original_template.{}", inputs.template_kind.extension());
    let mapping = outcome.table.to_csv()?;
    let diagnostics = diagnostics_csv(&outcome.diagnostics)?;
    let readme = readme(outcome, &template_name);

    let files: [(&str, &[u8]); 6] = [
        (MAPPING_CSV_NAME, mapping.as_bytes()),
        (DIAGNOSTICS_CSV_NAME, diagnostics.as_bytes()),
        (template_name.as_str(), &inputs.template[..]),
        ("original_query.txt", inputs.query.as_bytes()),
        ("original_schema.json", inputs.schema.as_bytes()),
        (README_NAME, readme.as_bytes()),
    ];

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in files {
        zip.start_file(name, options)
            .with_context(|| format!("Failed to add {name} to archive"))?;
        zip.write_all(body)
            .with_context(|| format!("Failed to write {name} to archive"))?;
    }
    let cursor = zip.finish().context("Failed to finalize export archive")?;
    Ok(cursor.into_inner())
}

fn readme(outcome: &ConversionOutcome, template_name: &str) -> String {
    format!(
        "Conga to Box Doc Gen Conversion\n\
         ===============================\n\
         Conversion Date: {date}\n\
         Run ID: {run_id}\n\
         Status: {status}\n\
         Mapped fields: {rows}\n\
         \n\
         This archive contains:\n\
         - {MAPPING_CSV_NAME}: mapping between Conga merge fields and Box Doc Gen fields\n\
         - {DIAGNOSTICS_CSV_NAME}: every diagnostic recorded during the run\n\
         - {template_name}: original Conga template\n\
         - original_query.txt: original SOQL query\n\
         - original_schema.json: original Box-Salesforce JSON schema\n\
         \n\
         Use the mapping CSV as a reference when converting the template to Box Doc Gen.\n\
         Review every row with medium or low confidence by hand.\n",
        date = outcome.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        run_id = outcome.run_id,
        status = outcome.status.as_str(),
        rows = outcome.table.len(),
    )
}
