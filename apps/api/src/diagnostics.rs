//! Diagnostics: the append-only run log shared by every pipeline stage.
//!
//! One `DiagnosticLog` exists per conversion run. Stages append to it in
//! chronological order; entries are never edited or removed. Every append is
//! mirrored to `tracing` so the operator log and the user-facing log agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::{ConversionError, ErrorKind};

/// Pipeline stage that produced a diagnostic or raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TemplateExtraction,
    QueryAnalysis,
    SchemaNormalization,
    Upload,
    PromptComposition,
    AiService,
    ResponseInterpretation,
    MappingAssembly,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TemplateExtraction => "template_extraction",
            Stage::QueryAnalysis => "query_analysis",
            Stage::SchemaNormalization => "schema_normalization",
            Stage::Upload => "upload",
            Stage::PromptComposition => "prompt_composition",
            Stage::AiService => "ai_service",
            Stage::ResponseInterpretation => "response_interpretation",
            Stage::MappingAssembly => "mapping_assembly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single immutable log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    /// Set when the entry records a `ConversionError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Offending input fragment, or the full raw AI response for parse failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only, single-writer diagnostic log for one run.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<DiagnosticEntry>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(stage, Severity::Info, message.into(), None, None);
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(stage, Severity::Warning, message.into(), None, None);
    }

    /// Records a warning that carries the offending input fragment.
    pub fn warn_with_context(
        &mut self,
        stage: Stage,
        message: impl Into<String>,
        context: impl Into<String>,
    ) {
        self.push(
            stage,
            Severity::Warning,
            message.into(),
            None,
            Some(context.into()),
        );
    }

    /// Records a `ConversionError`. Fatal errors are logged at `Error`
    /// severity; recoverable ones (the run degrades and continues) at `Warning`.
    pub fn record_error(&mut self, err: &ConversionError) {
        let severity = if err.is_fatal() {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.push(
            err.stage(),
            severity,
            err.to_string(),
            Some(err.kind()),
            err.context_fragment().map(str::to_string),
        );
    }

    fn push(
        &mut self,
        stage: Stage,
        severity: Severity,
        message: String,
        error_kind: Option<ErrorKind>,
        context: Option<String>,
    ) {
        match severity {
            Severity::Info => info!(stage = stage.as_str(), "{message}"),
            Severity::Warning => warn!(stage = stage.as_str(), "{message}"),
            Severity::Error => error!(stage = stage.as_str(), kind = ?error_kind, "{message}"),
        }
        self.entries.push(DiagnosticEntry {
            stage,
            severity,
            message,
            error_kind,
            context,
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn has_warnings(&self) -> bool {
        self.count(Severity::Warning) > 0
    }

    pub fn into_entries(self) -> Vec<DiagnosticEntry> {
        self.entries
    }
}

/// Renders diagnostics as numbered markdown blocks for display.
pub fn format_for_display(entries: &[DiagnosticEntry]) -> String {
    if entries.is_empty() {
        return "No diagnostics recorded.".to_string();
    }

    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "**{} {}** ({}) - {}\n{}\n",
            entry.severity.as_str(),
            i + 1,
            entry.stage.as_str(),
            entry.recorded_at.to_rfc3339(),
            entry.message
        ));
        if let Some(context) = &entry.context {
            out.push_str(&format!("Context:\n```\n{context}\n```\n"));
        }
        out.push('\n');
    }
    out
}
