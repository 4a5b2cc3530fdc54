use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::box_client::ServiceError;
use crate::diagnostics::Stage;

// ────────────────────────────────────────────────────────────────────────────
// Conversion pipeline errors
// ────────────────────────────────────────────────────────────────────────────

/// Closed set of error kinds a conversion run can report. Callers branch on
/// this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DocumentFormat,
    QuerySyntax,
    SchemaFormat,
    PayloadTooLarge,
    Upload,
    Service,
    ResponseParse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DocumentFormat => "document_format",
            ErrorKind::QuerySyntax => "query_syntax",
            ErrorKind::SchemaFormat => "schema_format",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Upload => "upload",
            ErrorKind::Service => "service",
            ErrorKind::ResponseParse => "response_parse",
        }
    }
}

/// Which hard limit a prompt payload exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadLimit {
    PromptChars,
    FileRefs,
}

/// Stage-level conversion failure.
///
/// `PayloadTooLarge`, `Upload`, `Service` and `ResponseParse` abort the run.
/// `DocumentFormat`, `QuerySyntax` and `SchemaFormat` degrade the run: the
/// stage output is empty and the run continues, since the AI service still
/// receives the original uploaded file.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Template could not be parsed: {reason}")]
    DocumentFormat { reason: String },

    #[error("Query could not be parsed: {reason}")]
    QuerySyntax { reason: String, fragment: String },

    #[error("Schema could not be parsed: {reason}")]
    SchemaFormat { reason: String },

    #[error("Prompt payload exceeds the {limit:?} limit ({measured} > {max})")]
    PayloadTooLarge {
        limit: PayloadLimit,
        measured: usize,
        max: usize,
    },

    #[error("Upload of '{filename}' failed: {source}")]
    Upload {
        filename: String,
        #[source]
        source: ServiceError,
    },

    #[error("AI service call failed: {0}")]
    Service(#[from] ServiceError),

    #[error("AI response could not be parsed: {reason}")]
    ResponseParse { reason: String, raw_text: String },
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::DocumentFormat { .. } => ErrorKind::DocumentFormat,
            ConversionError::QuerySyntax { .. } => ErrorKind::QuerySyntax,
            ConversionError::SchemaFormat { .. } => ErrorKind::SchemaFormat,
            ConversionError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ConversionError::Upload { .. } => ErrorKind::Upload,
            ConversionError::Service(_) => ErrorKind::Service,
            ConversionError::ResponseParse { .. } => ErrorKind::ResponseParse,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ConversionError::DocumentFormat { .. } => Stage::TemplateExtraction,
            ConversionError::QuerySyntax { .. } => Stage::QueryAnalysis,
            ConversionError::SchemaFormat { .. } => Stage::SchemaNormalization,
            ConversionError::PayloadTooLarge { .. } => Stage::PromptComposition,
            ConversionError::Upload { .. } => Stage::Upload,
            ConversionError::Service(_) => Stage::AiService,
            ConversionError::ResponseParse { .. } => Stage::ResponseInterpretation,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ConversionError::DocumentFormat { .. }
                | ConversionError::QuerySyntax { .. }
                | ConversionError::SchemaFormat { .. }
        )
    }

    /// Input fragment preserved alongside the error in diagnostics.
    pub fn context_fragment(&self) -> Option<&str> {
        match self {
            ConversionError::QuerySyntax { fragment, .. } => Some(fragment),
            ConversionError::ResponseParse { raw_text, .. } => Some(raw_text),
            ConversionError::Upload { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP boundary errors
// ────────────────────────────────────────────────────────────────────────────

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("AI service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Service(source) => AppError::Service(source),
            e @ ConversionError::PayloadTooLarge { .. } => AppError::PayloadTooLarge(e.to_string()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::Service(e) => {
                tracing::error!("AI service error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "AI_SERVICE_ERROR",
                    "The AI service could not process the request".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
