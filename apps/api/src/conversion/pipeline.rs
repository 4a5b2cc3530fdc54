//! Conversion run orchestration.
//!
//! Stages run strictly in order: extract template, analyze query, normalize
//! schema, upload inputs, compose prompt, call Box AI, interpret, assemble.
//! Every run owns its own `DiagnosticLog`; nothing is shared between runs.
//! Dropping the returned future cancels the run between awaits.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::box_client::{DocumentAi, FileRef, ServiceError};
use crate::config::PipelineConfig;
use crate::conversion::assembler::{assemble_mapping, MappingTable, RunStatus};
use crate::conversion::composer::{compose_prompt, CompositionInput, PromptPayload, UploadedFiles};
use crate::conversion::interpreter::{interpret_response, MappingRecord};
use crate::diagnostics::{DiagnosticEntry, DiagnosticLog, Stage};
use crate::errors::ConversionError;
use crate::query::{analyze_query, QueryGraph};
use crate::schema::{normalize_schema, SchemaField, SchemaIndex};
use crate::template::{extract_merge_fields, MergeField, TemplateKind};

/// One initial attempt plus a single retry on transient service failure.
const MAX_AI_ATTEMPTS: u32 = 2;

/// Raw inputs of one run, as uploaded by the user.
#[derive(Debug, Clone)]
pub struct ConversionInputs {
    pub template: Bytes,
    pub template_kind: TemplateKind,
    pub query: String,
    pub schema: String,
}

/// Result of a run. Status and the complete diagnostic log always travel together.
#[derive(Debug, Serialize)]
pub struct ConversionOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub table: MappingTable,
    pub diagnostics: Vec<DiagnosticEntry>,
    pub started_at: DateTime<Utc>,
}

/// Stages 1 to 3 only: no upload, no AI call.
#[derive(Debug, Serialize)]
pub struct PreviewOutcome {
    pub merge_fields: Vec<MergeField>,
    pub query: Option<QueryGraph>,
    pub schema_fields: Vec<SchemaField>,
    pub diagnostics: Vec<DiagnosticEntry>,
}

struct Extracted {
    merge_fields: Vec<MergeField>,
    query: Option<QueryGraph>,
    schema: SchemaIndex,
}

// ────────────────────────────────────────────────────────────────────────────
// Entry points
// ────────────────────────────────────────────────────────────────────────────

/// Runs the full conversion. Never returns an error: stage failures become a
/// `failed` status plus an error diagnostic.
pub async fn run_conversion(
    ai: &dyn DocumentAi,
    config: &PipelineConfig,
    inputs: &ConversionInputs,
) -> ConversionOutcome {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, "Starting conversion run");

    let mut diagnostics = DiagnosticLog::new();
    let extracted = extract_inputs(inputs, config, &mut diagnostics);

    let table = match convert(ai, config, inputs, &extracted, &mut diagnostics).await {
        Ok(records) => assemble_mapping(records, &extracted.merge_fields, &mut diagnostics),
        Err(e) => {
            diagnostics.record_error(&e);
            MappingTable::default()
        }
    };
    let status = RunStatus::determine(&table, &diagnostics);

    info!(
        %run_id,
        status = status.as_str(),
        rows = table.len(),
        diagnostics = diagnostics.entries().len(),
        "Conversion run finished"
    );
    ConversionOutcome {
        run_id,
        status,
        table,
        diagnostics: diagnostics.into_entries(),
        started_at,
    }
}

/// Dry run of the three local stages.
pub fn preview(inputs: &ConversionInputs, config: &PipelineConfig) -> PreviewOutcome {
    let mut diagnostics = DiagnosticLog::new();
    let extracted = extract_inputs(inputs, config, &mut diagnostics);
    PreviewOutcome {
        merge_fields: extracted.merge_fields,
        query: extracted.query,
        schema_fields: extracted.schema.fields().cloned().collect(),
        diagnostics: diagnostics.into_entries(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stages
// ────────────────────────────────────────────────────────────────────────────

/// Stages 1 to 3. A structural failure in any of them degrades to an empty
/// result; the AI still receives the original uploaded file.
fn extract_inputs(
    inputs: &ConversionInputs,
    config: &PipelineConfig,
    diagnostics: &mut DiagnosticLog,
) -> Extracted {
    let merge_fields = extract_merge_fields(
        &inputs.template,
        inputs.template_kind,
        config.context_chars,
        diagnostics,
    )
    .unwrap_or_else(|e| {
        diagnostics.record_error(&e);
        Vec::new()
    });

    let query = match analyze_query(&inputs.query, diagnostics) {
        Ok(graph) => Some(graph),
        Err(e) => {
            diagnostics.record_error(&e);
            None
        }
    };

    let schema = normalize_schema(&inputs.schema, diagnostics).unwrap_or_else(|e| {
        diagnostics.record_error(&e);
        SchemaIndex::default()
    });

    Extracted {
        merge_fields,
        query,
        schema,
    }
}

async fn convert(
    ai: &dyn DocumentAi,
    config: &PipelineConfig,
    inputs: &ConversionInputs,
    extracted: &Extracted,
    diagnostics: &mut DiagnosticLog,
) -> Result<Vec<MappingRecord>, ConversionError> {
    let files = upload_inputs(ai, inputs, diagnostics).await?;

    let payload = compose_prompt(
        &CompositionInput {
            merge_fields: &extracted.merge_fields,
            query: extracted.query.as_ref(),
            schema: &extracted.schema,
            files: &files,
        },
        config,
        diagnostics,
    )?;

    let raw = analyze_with_retry(ai, &payload, config, diagnostics).await?;
    interpret_response(&raw, &extracted.merge_fields, diagnostics)
}

/// Uploads template, query and schema in that order. Any failure aborts the run.
async fn upload_inputs(
    ai: &dyn DocumentAi,
    inputs: &ConversionInputs,
    diagnostics: &mut DiagnosticLog,
) -> Result<UploadedFiles, ConversionError> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

    let template = upload_one(
        ai,
        inputs.template.clone(),
        format!("conga_template_{stamp}.{}", inputs.template_kind.extension()),
        diagnostics,
    )
    .await?;
    let query = upload_one(
        ai,
        Bytes::from(inputs.query.clone()),
        format!("soql_query_{stamp}.txt"),
        diagnostics,
    )
    .await?;
    let schema = upload_one(
        ai,
        Bytes::from(inputs.schema.clone()),
        format!("schema_{stamp}.json"),
        diagnostics,
    )
    .await?;

    Ok(UploadedFiles {
        template,
        query,
        schema,
    })
}

async fn upload_one(
    ai: &dyn DocumentAi,
    bytes: Bytes,
    filename: String,
    diagnostics: &mut DiagnosticLog,
) -> Result<FileRef, ConversionError> {
    let size = bytes.len();
    let file = ai
        .upload_file(bytes, &filename)
        .await
        .map_err(|source| ConversionError::Upload {
            filename: filename.clone(),
            source,
        })?;
    diagnostics.info(
        Stage::Upload,
        format!("Uploaded {filename} ({size} bytes) as file {}", file.id),
    );
    Ok(file)
}

/// Calls `analyze` under the configured timeout, retrying once on a
/// transient failure. Permanent rejections are not retried.
pub(crate) async fn analyze_with_retry(
    ai: &dyn DocumentAi,
    payload: &PromptPayload,
    config: &PipelineConfig,
    diagnostics: &mut DiagnosticLog,
) -> Result<String, ServiceError> {
    let mut attempt = 1;
    loop {
        let result = tokio::time::timeout(config.ai_timeout, ai.analyze(payload))
            .await
            .unwrap_or_else(|_| Err(ServiceError::Timeout(config.ai_timeout)));

        match result {
            Ok(answer) => {
                diagnostics.info(
                    Stage::AiService,
                    format!("Box AI answered with {} characters", answer.chars().count()),
                );
                return Ok(answer);
            }
            Err(e) if e.is_transient() && attempt < MAX_AI_ATTEMPTS => {
                diagnostics.info(
                    Stage::AiService,
                    format!("Attempt {attempt}/{MAX_AI_ATTEMPTS} failed ({e}); retrying"),
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
