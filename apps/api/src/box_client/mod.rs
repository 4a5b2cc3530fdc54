//! Box client: the single point of entry for file storage and Box AI calls.
//!
//! No other module talks to the Box API directly. The pipeline depends only on
//! the `DocumentAi` trait, so tests swap in a scripted fake.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BoxSettings;
use crate::conversion::composer::PromptPayload;

pub mod prompts;

/// Sampling temperature for mapping generation. Low to keep output tabular.
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 1000;
/// Transport-level ceiling; the pipeline applies its own per-call timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed service response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Transient failures may succeed on a retry; permanent ones never will.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport(_) | ServiceError::Timeout(_) | ServiceError::Unavailable { .. }
        )
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let message = serde_json::from_str::<BoxErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ServiceError::Unavailable {
                status: status.as_u16(),
                message,
            }
        } else {
            ServiceError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout(HTTP_TIMEOUT)
        } else if e.is_decode() {
            ServiceError::MalformedResponse(e.to_string())
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

/// Opaque handle to a previously uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
}

/// The external document-understanding capability: file storage plus a
/// prompt-over-files analysis call.
#[async_trait]
pub trait DocumentAi: Send + Sync {
    async fn upload_file(&self, bytes: Bytes, filename: &str) -> Result<FileRef, ServiceError>;

    async fn analyze(&self, payload: &PromptPayload) -> Result<String, ServiceError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Box wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct UploadAttributes<'a> {
    name: &'a str,
    parent: ParentFolder<'a>,
}

#[derive(Debug, Serialize)]
struct ParentFolder<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    entries: Vec<UploadedEntry>,
}

#[derive(Debug, Deserialize)]
struct UploadedEntry {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct TextGenRequest<'a> {
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    items: Vec<TextGenItem<'a>>,
    temperature: f32,
    max_tokens: u32,
    ai_agent: AiAgent<'a>,
}

#[derive(Debug, Serialize)]
struct TextGenItem<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    item_type: &'a str,
}

#[derive(Debug, Serialize)]
struct AiAgent<'a> {
    #[serde(rename = "type")]
    agent_type: &'a str,
    basic_gen: BasicGen<'a>,
}

#[derive(Debug, Serialize)]
struct BasicGen<'a> {
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct TextGenResponse {
    #[serde(alias = "text")]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoxErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Box REST client implementing `DocumentAi`.
#[derive(Clone)]
pub struct BoxClient {
    client: Client,
    settings: BoxSettings,
}

impl BoxClient {
    pub fn new(settings: BoxSettings) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    /// Checks the developer token against `/2.0/users/me`.
    pub async fn validate_token(&self) -> bool {
        let url = format!("{}/2.0/users/me", self.settings.api_url);
        match self
            .client
            .get(url)
            .bearer_auth(&self.settings.developer_token)
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                warn!("Box token validation request failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl DocumentAi for BoxClient {
    async fn upload_file(&self, bytes: Bytes, filename: &str) -> Result<FileRef, ServiceError> {
        let url = format!("{}/2.0/files/content", self.settings.upload_url);
        let attributes = serde_json::to_string(&UploadAttributes {
            name: filename,
            parent: ParentFolder {
                id: &self.settings.parent_folder_id,
            },
        })
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

        // Box requires `attributes` to precede `file` in the multipart body.
        let form = multipart::Form::new().text("attributes", attributes).part(
            "file",
            multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.developer_token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, body));
        }

        let uploaded: UploadResponse = response.json().await?;
        let entry = uploaded.entries.into_iter().next().ok_or_else(|| {
            ServiceError::MalformedResponse("upload response contained no entries".to_string())
        })?;

        debug!("Uploaded '{}' as Box file {}", filename, entry.id);
        Ok(FileRef {
            id: entry.id,
            name: entry.name.unwrap_or_else(|| filename.to_string()),
        })
    }

    async fn analyze(&self, payload: &PromptPayload) -> Result<String, ServiceError> {
        let url = format!("{}/2.0/ai/text_gen", self.settings.api_url);
        let request_body = TextGenRequest {
            prompt: payload.prompt(),
            items: payload
                .file_refs
                .iter()
                .map(|f| TextGenItem {
                    id: &f.id,
                    item_type: "file",
                })
                .collect(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            ai_agent: AiAgent {
                agent_type: "ai_agent_text_gen",
                basic_gen: BasicGen {
                    model: &self.settings.ai_model,
                },
            },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.developer_token)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Box AI returned {}: {}", status, body);
            return Err(ServiceError::from_status(status, body));
        }

        let generated: TextGenResponse = response.json().await?;
        generated
            .answer
            .ok_or_else(|| ServiceError::MalformedResponse("response had no answer".to_string()))
    }
}
