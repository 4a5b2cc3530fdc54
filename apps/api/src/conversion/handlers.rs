use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversion::assembler::{RunStatus, COLUMNS};
use crate::conversion::error_analysis::{analyze_error, ErrorAnalysisOutcome, ErrorAnalysisRequest};
use crate::conversion::export::{build_export_archive, ARCHIVE_NAME};
use crate::conversion::interpreter::MappingRecord;
use crate::conversion::pipeline::{preview, run_conversion, ConversionInputs, PreviewOutcome};
use crate::diagnostics::{format_for_display, DiagnosticEntry};
use crate::errors::AppError;
use crate::state::AppState;
use crate::template::TemplateKind;

const STATUS_HEADER: HeaderName = HeaderName::from_static("x-conversion-status");
const RUN_ID_HEADER: HeaderName = HeaderName::from_static("x-run-id");

#[derive(Serialize)]
pub struct ConversionResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub columns: [&'static str; 4],
    pub rows: Vec<MappingRecord>,
    pub markdown: String,
    pub diagnostics: Vec<DiagnosticEntry>,
    pub diagnostics_markdown: String,
}

/// POST /api/v1/conversions
pub async fn handle_convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ConversionResponse>, AppError> {
    let inputs = read_conversion_form(multipart).await?;
    let outcome = run_conversion(state.ai.as_ref(), &state.config.pipeline, &inputs).await;

    Ok(Json(ConversionResponse {
        run_id: outcome.run_id,
        status: outcome.status,
        columns: COLUMNS,
        markdown: outcome.table.to_markdown(),
        rows: outcome.table.rows,
        diagnostics_markdown: format_for_display(&outcome.diagnostics),
        diagnostics: outcome.diagnostics,
    }))
}

/// POST /api/v1/conversions/export
pub async fn handle_export(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let inputs = read_conversion_form(multipart).await?;
    let outcome = run_conversion(state.ai.as_ref(), &state.config.pipeline, &inputs).await;
    let archive = build_export_archive(&outcome, &inputs)?;
    info!(
        run_id = %outcome.run_id,
        "Built export archive ({} bytes)",
        archive.len()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{ARCHIVE_NAME}\""),
            ),
            (STATUS_HEADER, outcome.status.as_str().to_string()),
            (RUN_ID_HEADER, outcome.run_id.to_string()),
        ],
        archive,
    )
        .into_response())
}

/// POST /api/v1/conversions/preview
pub async fn handle_preview(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PreviewOutcome>, AppError> {
    let inputs = read_conversion_form(multipart).await?;
    Ok(Json(preview(&inputs, &state.config.pipeline)))
}

/// POST /api/v1/error-analysis
pub async fn handle_error_analysis(
    State(state): State<AppState>,
    Json(req): Json<ErrorAnalysisRequest>,
) -> Result<Json<ErrorAnalysisOutcome>, AppError> {
    if req.error_context.trim().is_empty() {
        return Err(AppError::Validation("error_context must not be empty".to_string()));
    }
    let outcome = analyze_error(state.ai.as_ref(), &state.config.pipeline, &req.error_context).await?;
    Ok(Json(outcome))
}

// ────────────────────────────────────────────────────────────────────────────
// Multipart form
// ────────────────────────────────────────────────────────────────────────────

/// Reads the `template`, `query` and `schema` parts. `query` and `schema` may
/// arrive as uploaded files or as plain text fields.
async fn read_conversion_form(mut multipart: Multipart) -> Result<ConversionInputs, AppError> {
    let mut template: Option<(Bytes, TemplateKind)> = None;
    let mut query: Option<String> = None;
    let mut schema: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "multipart body"))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "template" => {
                let kind = TemplateKind::detect(field.file_name(), field.content_type());
                let bytes = read_bytes(field, "template").await?;
                template = Some((bytes, kind));
            }
            "query" => query = Some(read_text(field, "query").await?),
            "schema" => schema = Some(read_text(field, "schema").await?),
            _ => warn!("Ignoring unknown multipart field: {name}"),
        }
    }

    let (template, template_kind) = template.ok_or_else(|| missing("template"))?;
    let query = query.ok_or_else(|| missing("query"))?;
    let schema = schema.ok_or_else(|| missing("schema"))?;

    if template.is_empty() {
        return Err(AppError::Validation("'template' part is empty".to_string()));
    }
    for (part, value) in [("query", &query), ("schema", &schema)] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("'{part}' part is empty")));
        }
    }

    Ok(ConversionInputs {
        template,
        template_kind,
        query,
        schema,
    })
}

async fn read_bytes(field: Field<'_>, part: &str) -> Result<Bytes, AppError> {
    field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, &format!("'{part}' part")))
}

async fn read_text(field: Field<'_>, part: &str) -> Result<String, AppError> {
    let bytes = read_bytes(field, part).await?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| AppError::Validation(format!("'{part}' part must be UTF-8 text")))
}

/// Oversized bodies surface here once `DefaultBodyLimit` trips.
fn multipart_error(e: MultipartError, what: &str) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!("Upload exceeds the configured body limit: {e}"))
    } else {
        AppError::Validation(format!("Failed to read {what}: {e}"))
    }
}

fn missing(part: &str) -> AppError {
    AppError::Validation(format!("Missing '{part}' part"))
}
