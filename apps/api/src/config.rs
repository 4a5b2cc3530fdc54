use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub box_settings: BoxSettings,
    pub pipeline: PipelineConfig,
    pub port: u16,
    pub rust_log: String,
    pub max_upload_bytes: usize,
}

/// Connection settings for the Box API.
#[derive(Debug, Clone)]
pub struct BoxSettings {
    pub developer_token: String,
    pub api_url: String,
    pub upload_url: String,
    pub parent_folder_id: String,
    pub ai_model: String,
}

/// Per-run pipeline limits. Passed explicitly into every stage; the pipeline
/// never reads the environment itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Merge-field budget: fields beyond this count are dropped from the prompt.
    pub max_merge_fields: usize,
    /// Hard ceiling on the final prompt length, in characters.
    pub max_prompt_chars: usize,
    pub max_file_refs: usize,
    pub ai_timeout: Duration,
    /// Characters of surrounding text captured on each side of a merge field.
    pub context_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_merge_fields: 200,
            // Box AI text_gen rejects prompts longer than 10k characters.
            max_prompt_chars: 10_000,
            max_file_refs: 3,
            ai_timeout: Duration::from_secs(120),
            context_chars: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();

        Ok(Config {
            box_settings: BoxSettings {
                developer_token: require_env("BOX_DEVELOPER_TOKEN")?,
                api_url: env_or("BOX_API_URL", "https://api.box.com"),
                upload_url: env_or("BOX_UPLOAD_URL", "https://upload.box.com/api"),
                parent_folder_id: env_or("BOX_PARENT_FOLDER_ID", "0"),
                ai_model: env_or("BOX_AI_MODEL", "azure__openai__gpt_4o_mini"),
            },
            pipeline: PipelineConfig {
                max_merge_fields: parse_env("MAX_MERGE_FIELDS", defaults.max_merge_fields)?,
                max_prompt_chars: parse_env("MAX_PROMPT_CHARS", defaults.max_prompt_chars)?,
                max_file_refs: parse_env("MAX_FILE_REFS", defaults.max_file_refs)?,
                ai_timeout: Duration::from_secs(parse_env(
                    "AI_TIMEOUT_SECS",
                    defaults.ai_timeout.as_secs(),
                )?),
                context_chars: parse_env("CONTEXT_CHARS", defaults.context_chars)?,
            },
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
