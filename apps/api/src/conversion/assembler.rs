//! Mapping Assembler: final table, coverage check and run status.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::conversion::interpreter::MappingRecord;
use crate::diagnostics::{DiagnosticLog, Severity, Stage};
use crate::template::MergeField;

/// Fixed column order of the mapping artifact.
pub const COLUMNS: [&str; 4] = ["conga_field", "box_field", "confidence", "notes"];

/// Overall outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// `failed` when a fatal stage error was logged or the table is empty,
    /// `partial` when any warning was logged, otherwise `success`.
    pub fn determine(table: &MappingTable, diagnostics: &DiagnosticLog) -> Self {
        if table.is_empty() || diagnostics.count(Severity::Error) > 0 {
            RunStatus::Failed
        } else if diagnostics.has_warnings() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Rows keep the order in which they were parsed from the AI answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    pub rows: Vec<MappingRecord>,
}

impl MappingTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for row in &self.rows {
            writer.write_record([
                row.conga_field.as_str(),
                row.box_field.as_str(),
                row.confidence.as_str(),
                row.notes.as_str(),
            ])?;
        }
        let bytes = writer.into_inner().context("Failed to flush mapping CSV")?;
        String::from_utf8(bytes).context("Mapping CSV is not valid UTF-8")
    }

    pub fn to_markdown(&self) -> String {
        if self.rows.is_empty() {
            return "No mappings found.".to_string();
        }

        let cell = |s: &str| s.replace('|', "\\|").replace('\n', " ");
        let mut out = String::from("| Conga Field | Box Field | Confidence | Notes |\n");
        out.push_str("|-------------|-----------|------------|-------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| «{}» | {} | {} | {} |\n",
                cell(&row.conga_field),
                cell(&row.box_field),
                row.confidence.as_str(),
                cell(&row.notes)
            ));
        }
        out
    }
}

/// Builds the table and warns once about merge fields no row covers.
pub fn assemble_mapping(
    records: Vec<MappingRecord>,
    merge_fields: &[MergeField],
    diagnostics: &mut DiagnosticLog,
) -> MappingTable {
    let mut uncovered: Vec<&str> = Vec::new();
    for field in merge_fields {
        let token = field.token.as_str();
        if !uncovered.contains(&token) && !records.iter().any(|r| r.conga_field == token) {
            uncovered.push(token);
        }
    }
    if !uncovered.is_empty() && !records.is_empty() {
        diagnostics.warn(
            Stage::MappingAssembly,
            format!(
                "{} merge field(s) have no mapping row: {}",
                uncovered.len(),
                uncovered.join(", ")
            ),
        );
    }

    diagnostics.info(
        Stage::MappingAssembly,
        format!("Assembled mapping table with {} row(s)", records.len()),
    );
    MappingTable { rows: records }
}
