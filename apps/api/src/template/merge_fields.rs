//! Conga merge-field scanning over flattened template text.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticLog, Stage};

pub const OPEN_DELIMITER: char = '«';
pub const CLOSE_DELIMITER: char = '»';

/// A merge-field placeholder found in the template, in document order.
/// Tokens may repeat; each occurrence is its own field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeField {
    /// Field name without the «» delimiters.
    pub token: String,
    /// Surrounding text, with `...` where the window was cut.
    pub raw_context: String,
    /// 0-based ordinal among the accepted fields.
    pub position_index: usize,
}

impl MergeField {
    /// The token as it appears in the template, delimiters included.
    pub fn delimited(&self) -> String {
        format!("{OPEN_DELIMITER}{}{CLOSE_DELIMITER}", self.token)
    }
}

fn merge_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"«([^«»]*)»").expect("merge field pattern is valid"))
}

/// Scans `text` for `«Token»` placeholders.
///
/// Empty tokens, tokens spanning a line break and unterminated `«` are skipped
/// with a warning; everything else is kept in order of appearance.
pub fn scan_merge_fields(
    text: &str,
    context_chars: usize,
    diagnostics: &mut DiagnosticLog,
) -> Vec<MergeField> {
    let mut fields = Vec::new();
    let mut matched = 0usize;

    for caps in merge_field_regex().captures_iter(text) {
        matched += 1;
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let token = inner.as_str().trim();

        if token.is_empty() {
            diagnostics.warn_with_context(
                Stage::TemplateExtraction,
                "Skipped empty merge field",
                context_window(text, whole.start(), whole.end(), context_chars),
            );
            continue;
        }
        if token.contains(['\n', '\r']) {
            diagnostics.warn_with_context(
                Stage::TemplateExtraction,
                "Skipped merge field that spans a line break",
                whole.as_str(),
            );
            continue;
        }

        fields.push(MergeField {
            token: token.to_string(),
            raw_context: context_window(text, whole.start(), whole.end(), context_chars),
            position_index: fields.len(),
        });
    }

    let unterminated = text
        .matches(OPEN_DELIMITER)
        .count()
        .saturating_sub(matched);
    if unterminated > 0 {
        diagnostics.warn(
            Stage::TemplateExtraction,
            format!("Skipped {unterminated} unterminated merge field delimiter(s)"),
        );
    }

    fields
}

/// Returns up to `n` characters either side of `text[start..end]`,
/// marking cut edges with `...`. Operates on characters, not bytes.
fn context_window(text: &str, start: usize, end: usize, n: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    let mut window = String::new();
    if from > 0 {
        window.push_str("...");
    }
    window.push_str(&text[from..to]);
    if to < text.len() {
        window.push_str("...");
    }
    window
}
