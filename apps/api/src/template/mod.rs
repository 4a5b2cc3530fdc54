//! Template Extractor: turns an uploaded Conga template into ordered merge fields.

pub mod docx;
pub mod merge_fields;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticLog, Stage};
use crate::errors::ConversionError;

pub use merge_fields::MergeField;

/// Declared type of the uploaded template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Docx,
    Text,
}

impl TemplateKind {
    /// Infers the template type from the upload's file name and content type.
    /// Anything not recognisably plain text is treated as DOCX.
    pub fn detect(filename: Option<&str>, content_type: Option<&str>) -> Self {
        let by_name = filename.map(|n| n.to_ascii_lowercase());
        if by_name.as_deref().is_some_and(|n| n.ends_with(".txt")) {
            return TemplateKind::Text;
        }
        if content_type.is_some_and(|ct| ct.starts_with("text/plain")) {
            return TemplateKind::Text;
        }
        TemplateKind::Docx
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TemplateKind::Docx => "docx",
            TemplateKind::Text => "txt",
        }
    }
}

/// Extracts merge fields from raw template bytes.
///
/// A template without merge fields yields an empty vector, not an error.
/// Structurally unreadable input fails with `DocumentFormat`; field-level
/// problems are skipped with warnings.
pub fn extract_merge_fields(
    bytes: &[u8],
    kind: TemplateKind,
    context_chars: usize,
    diagnostics: &mut DiagnosticLog,
) -> Result<Vec<MergeField>, ConversionError> {
    let text = match kind {
        TemplateKind::Docx => docx::extract_docx_text(bytes)?,
        TemplateKind::Text => String::from_utf8(bytes.to_vec()).map_err(|e| {
            ConversionError::DocumentFormat {
                reason: format!("text template is not valid UTF-8: {e}"),
            }
        })?,
    };

    let fields = merge_fields::scan_merge_fields(&text, context_chars, diagnostics);
    diagnostics.info(
        Stage::TemplateExtraction,
        format!(
            "Extracted {} merge field(s) from {} characters of template text",
            fields.len(),
            text.chars().count()
        ),
    );
    Ok(fields)
}
