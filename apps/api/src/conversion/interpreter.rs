//! Response Interpreter: turns Box AI's answer into validated `MappingRecord`s.
//!
//! Parsing is two-tier. The strict pass expects exactly what the prompt asked
//! for: a CSV table whose first line is the `conga_field,box_field,...` header.
//! If that fails, one repair pass strips code fences and surrounding prose,
//! unwraps markdown tables, normalizes tab/semicolon delimiters (or reads a
//! JSON array), re-encodes the block as canonical CSV and runs the strict pass
//! once more. A failed repair is a `ResponseParse` error carrying the raw text.

use std::collections::HashSet;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversion::prompts::MAPPING_CSV_HEADER;
use crate::diagnostics::{DiagnosticLog, Stage};
use crate::errors::ConversionError;
use crate::template::MergeField;

/// Placeholder answers meaning "no target field".
const NO_MATCH_VALUES: &[&str] = &["n/a", "na", "none", "-", "no match", "unmapped", "unknown"];

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    /// Reads a self-reported confidence label or score.
    /// Scores are fractions (`0.85`) or percentages (`85%`, `85`).
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().to_ascii_lowercase();
        match value.as_str() {
            "high" | "h" => return Some(Confidence::High),
            "medium" | "med" | "m" | "moderate" => return Some(Confidence::Medium),
            "low" | "l" => return Some(Confidence::Low),
            _ => {}
        }

        let percent = value.ends_with('%');
        let mut score: f64 = value.trim_end_matches('%').trim().parse().ok()?;
        if percent || score > 1.0 {
            score /= 100.0;
        }
        Some(if score >= 0.8 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        })
    }
}

/// One output row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Merge-field token without «» delimiters.
    pub conga_field: String,
    /// Box Doc Gen tag, always in `{{...}}` form when a target was proposed.
    pub box_field: String,
    pub confidence: Confidence,
    pub notes: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Interpretation
// ────────────────────────────────────────────────────────────────────────────

/// Parses and validates the raw answer against the template's merge fields.
pub fn interpret_response(
    raw: &str,
    merge_fields: &[MergeField],
    diagnostics: &mut DiagnosticLog,
) -> Result<Vec<MappingRecord>, ConversionError> {
    if raw.trim().is_empty() {
        return Err(ConversionError::ResponseParse {
            reason: "AI service returned an empty answer".to_string(),
            raw_text: raw.to_string(),
        });
    }

    let table = match strict_parse(raw) {
        Ok(table) => table,
        Err(strict_reason) => {
            let repaired = repair(raw).ok_or_else(|| ConversionError::ResponseParse {
                reason: format!("{strict_reason}; repair found no mapping table"),
                raw_text: raw.to_string(),
            })?;
            let table = strict_parse(&repaired).map_err(|reason| ConversionError::ResponseParse {
                reason: format!("{strict_reason}; repaired text still invalid: {reason}"),
                raw_text: raw.to_string(),
            })?;
            diagnostics.info(
                Stage::ResponseInterpretation,
                format!("Strict parse failed ({strict_reason}); repaired response parsed"),
            );
            table
        }
    };

    let known: HashSet<&str> = merge_fields.iter().map(|f| f.token.as_str()).collect();
    let mut records = Vec::with_capacity(table.rows.len());
    for (i, row) in table.rows.iter().enumerate() {
        if let Some(record) = validate_row(i + 1, row, &table.columns, &known, diagnostics) {
            records.push(record);
        }
    }

    diagnostics.info(
        Stage::ResponseInterpretation,
        format!(
            "Interpreted {} mapping row(s), dropped {}",
            records.len(),
            table.rows.len() - records.len()
        ),
    );
    Ok(records)
}

fn validate_row(
    row_number: usize,
    row: &StringRecord,
    columns: &Columns,
    known: &HashSet<&str>,
    diagnostics: &mut DiagnosticLog,
) -> Option<MappingRecord> {
    let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(str::trim).unwrap_or("");
    let raw_row = row.iter().collect::<Vec<_>>().join(",");

    let conga_field = cell(Some(columns.conga))
        .trim_matches(|c: char| matches!(c, '«' | '»' | '`' | '*' | '"') || c.is_whitespace())
        .to_string();
    if conga_field.is_empty() {
        diagnostics.warn_with_context(
            Stage::ResponseInterpretation,
            format!("Dropped row {row_number}: missing conga_field"),
            raw_row,
        );
        return None;
    }

    let box_raw = cell(Some(columns.box_field)).trim_matches('`').trim();
    if box_raw.is_empty() {
        diagnostics.warn_with_context(
            Stage::ResponseInterpretation,
            format!("Dropped row {row_number} ({conga_field}): missing box_field"),
            raw_row,
        );
        return None;
    }

    let confidence_raw = cell(columns.confidence);
    let mut confidence = if confidence_raw.is_empty() {
        Confidence::High
    } else {
        Confidence::parse(confidence_raw).unwrap_or_else(|| {
            diagnostics.warn(
                Stage::ResponseInterpretation,
                format!(
                    "Row {row_number} ({conga_field}): unreadable confidence '{confidence_raw}', using low"
                ),
            );
            Confidence::Low
        })
    };

    let no_match = NO_MATCH_VALUES.contains(&box_raw.to_ascii_lowercase().as_str());
    let box_field = if no_match {
        confidence = Confidence::Low;
        diagnostics.warn(
            Stage::ResponseInterpretation,
            format!("Row {row_number} ({conga_field}): no Box field proposed"),
        );
        box_raw.to_string()
    } else {
        format!("{{{{{}}}}}", box_raw.trim_matches(|c: char| c == '{' || c == '}').trim())
    };

    if !known.contains(conga_field.as_str()) {
        confidence = Confidence::Low;
        diagnostics.warn(
            Stage::ResponseInterpretation,
            format!(
                "Row {row_number}: «{conga_field}» is not a merge field in the template; confidence set to low"
            ),
        );
    }

    let mut notes = cell(columns.notes).to_string();
    let overflow: Vec<&str> = row
        .iter()
        .skip(columns.width)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if !overflow.is_empty() {
        // Unquoted commas in the last column split the notes apart.
        if columns.notes == Some(columns.width - 1) {
            notes = std::iter::once(notes.as_str())
                .chain(overflow.iter().copied())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            diagnostics.warn_with_context(
                Stage::ResponseInterpretation,
                format!(
                    "Row {row_number} ({conga_field}): {} extra cell(s) joined into notes",
                    overflow.len()
                ),
                raw_row,
            );
        } else {
            diagnostics.warn_with_context(
                Stage::ResponseInterpretation,
                format!(
                    "Row {row_number} ({conga_field}): {} extra cell(s) ignored",
                    overflow.len()
                ),
                raw_row,
            );
        }
    }

    Some(MappingRecord {
        conga_field,
        box_field,
        confidence,
        notes,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Strict parse
// ────────────────────────────────────────────────────────────────────────────

/// Column positions resolved from the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Columns {
    conga: usize,
    box_field: usize,
    confidence: Option<usize>,
    notes: Option<usize>,
    /// Number of header cells.
    width: usize,
}

impl Columns {
    fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let names: Vec<String> = headers
            .into_iter()
            .map(|h| {
                h.chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase()
            })
            .collect();
        let position = |aliases: &[&str]| names.iter().position(|n| aliases.contains(&n.as_str()));

        Some(Columns {
            conga: position(&["congafield", "conga", "congamergefield", "mergefield"])?,
            box_field: position(&["boxfield", "box", "boxdocgenfield", "boxmergefield", "boxtag"])?,
            confidence: position(&["confidence"]),
            notes: position(&["notes", "note", "comments", "comment"]),
            width: names.len(),
        })
    }
}

#[derive(Debug)]
struct Table {
    columns: Columns,
    rows: Vec<StringRecord>,
}

/// Accepts only a header-first CSV table where every line after the header
/// looks like a data row. Prose lines and bad quoting fail the pass.
fn strict_parse(text: &str) -> Result<Table, String> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.trim().as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| format!("unreadable header: {e}"))?
        .clone();
    let columns = Columns::from_headers(headers.iter())
        .ok_or_else(|| "first line is not a conga_field,box_field header".to_string())?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("malformed CSV: {e}"))?;
        let first = record.get(0).unwrap_or("");
        let second = record.get(1).unwrap_or("");
        if record.len() < 2 || !looks_like_data_row(first, second, record.len(), columns.width) {
            return Err(format!("line {} is not a table row", i + 2));
        }
        rows.push(record);
    }
    Ok(Table { columns, rows })
}

/// A row belongs to the table when it has the header's width, or when it
/// starts with a merge-field token followed by a field reference. Anything
/// else (commentary that happens to contain a delimiter) ends the table.
fn looks_like_data_row(first: &str, second: &str, cells: usize, header_width: usize) -> bool {
    if cells == header_width {
        return true;
    }
    let strip = |cell: &str| {
        cell.trim()
            .trim_matches(|c: char| matches!(c, '`' | '*' | '"' | '{' | '}'))
            .trim()
            .to_string()
    };
    let is_token = |cell: &str| !cell.is_empty() && !cell.contains(char::is_whitespace);

    let first = strip(first);
    if first.starts_with('«') {
        return true;
    }
    let second = strip(second);
    is_token(&first)
        && (is_token(&second) || NO_MATCH_VALUES.contains(&second.to_ascii_lowercase().as_str()))
}

// ────────────────────────────────────────────────────────────────────────────
// Repair pass
// ────────────────────────────────────────────────────────────────────────────

/// Extracts the mapping block from near-miss output and re-encodes it as
/// canonical comma-separated CSV. Returns `None` when no block is found.
fn repair(raw: &str) -> Option<String> {
    if let Some(csv) = repair_json(raw) {
        return Some(csv);
    }

    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect();

    let (start, delimiter) = lines.iter().enumerate().find_map(|(i, line)| {
        let delimiter = detect_delimiter(line)?;
        let cells = split_cells(line, delimiter)?;
        let is_start = Columns::from_headers(cells.iter().map(String::as_str)).is_some()
            || cells[0].trim_start_matches(['`', '*']).starts_with('«');
        is_start.then_some((i, delimiter))
    })?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;
    let mut width = MAPPING_CSV_HEADER.split(',').count();
    for line in &lines[start..] {
        let Some(cells) = split_cells(line, delimiter) else {
            break;
        };
        if is_separator_row(&cells) {
            continue;
        }
        if rows.is_empty() {
            if Columns::from_headers(cells.iter().map(String::as_str)).is_some() {
                has_header = true;
                width = cells.len();
            }
        } else if !looks_like_data_row(&cells[0], &cells[1], cells.len(), width) {
            break;
        }
        rows.push(cells);
    }

    if !has_header {
        rows.insert(0, MAPPING_CSV_HEADER.split(',').map(str::to_string).collect());
    }
    write_csv(&rows)
}

fn detect_delimiter(line: &str) -> Option<u8> {
    if line.starts_with('|') {
        return Some(b'|');
    }
    let mut best: Option<(u8, usize)> = None;
    for delimiter in [b',', b'\t', b';'] {
        let n = line.bytes().filter(|b| *b == delimiter).count();
        if n > 0 && best.map_or(true, |(_, most)| n > most) {
            best = Some((delimiter, n));
        }
    }
    best.map(|(d, _)| d)
}

fn split_cells(line: &str, delimiter: u8) -> Option<Vec<String>> {
    let cells: Vec<String> = if delimiter == b'|' {
        line.trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    } else {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .trim(Trim::All)
            .from_reader(line.as_bytes())
            .records()
            .next()?
            .ok()?
            .iter()
            .map(str::to_string)
            .collect()
    };
    (cells.len() >= 2).then_some(cells)
}

/// Markdown table rule such as `|---|:---:|`.
fn is_separator_row(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
}

/// Reads `[{"conga_field": ..., "box_field": ...}, ...]` anywhere in the text.
fn repair_json(raw: &str) -> Option<String> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let items: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&raw[start..=end]).ok()?;
    if items.is_empty() {
        return None;
    }

    let value_of = |item: &serde_json::Map<String, Value>, keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| item.get(*k))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };

    let mut rows = vec![MAPPING_CSV_HEADER.split(',').map(str::to_string).collect::<Vec<_>>()];
    for item in &items {
        rows.push(vec![
            value_of(item, &["conga_field", "congaField", "conga"]),
            value_of(item, &["box_field", "boxField", "box"]),
            value_of(item, &["confidence"]),
            value_of(item, &["notes", "note"]),
        ]);
    }
    if rows[1..].iter().all(|r| r[0].is_empty()) {
        return None;
    }
    write_csv(&rows)
}

fn write_csv(rows: &[Vec<String>]) -> Option<String> {
    let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).ok()?;
    }
    let bytes = writer.into_inner().ok()?;
    String::from_utf8(bytes).ok()
}
