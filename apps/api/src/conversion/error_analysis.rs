//! Error analysis: asks Box AI to explain a failed conversion and splits the
//! answer into cause, solutions and additional information.
//!
//! This is its own request, separate from any conversion run. No files are
//! attached; the error context travels inline in the prompt.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::box_client::prompts::EXPERT_PREAMBLE;
use crate::box_client::DocumentAi;
use crate::config::PipelineConfig;
use crate::conversion::composer::PromptPayload;
use crate::conversion::pipeline::analyze_with_retry;
use crate::conversion::prompts::ERROR_ANALYSIS_PROMPT_TEMPLATE;
use crate::diagnostics::{DiagnosticEntry, DiagnosticLog};
use crate::errors::{ConversionError, PayloadLimit};

const TRUNCATION_MARKER: &str = "\n... [truncated]";

#[derive(Debug, Deserialize)]
pub struct ErrorAnalysisRequest {
    pub error_context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub cause: String,
    pub solutions: String,
    pub additional_information: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorAnalysisOutcome {
    pub analysis: ErrorAnalysis,
    pub raw_response: String,
    pub diagnostics: Vec<DiagnosticEntry>,
}

/// Builds the analysis prompt, shortening `error_context` until it fits
/// `max_prompt_chars`. Fails when even the bare instructions exceed it.
pub fn build_error_analysis_prompt(
    error_context: &str,
    max_prompt_chars: usize,
) -> Result<PromptPayload, ConversionError> {
    let render = |context: &str| {
        ERROR_ANALYSIS_PROMPT_TEMPLATE
            .replace("{preamble}", EXPERT_PREAMBLE)
            .replace("{error_context}", context)
    };

    let mut instruction_text = render(error_context.trim());
    let overflow = instruction_text.chars().count().saturating_sub(max_prompt_chars);
    if overflow > 0 {
        let keep = error_context
            .trim()
            .chars()
            .count()
            .saturating_sub(overflow + TRUNCATION_MARKER.chars().count());
        let shortened: String = error_context.trim().chars().take(keep).collect();
        instruction_text = render(&format!("{shortened}{TRUNCATION_MARKER}"));
    }

    let measured = instruction_text.chars().count();
    if measured > max_prompt_chars {
        return Err(ConversionError::PayloadTooLarge {
            limit: PayloadLimit::PromptChars,
            measured,
            max: max_prompt_chars,
        });
    }

    Ok(PromptPayload {
        instruction_text,
        file_refs: Vec::new(),
        inline_context: String::new(),
    })
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[\s#>*\-]*(cause|solutions?|additional information)[\s*]*(?::|$)")
            .expect("heading pattern is valid")
    })
}

/// Splits an answer into its three sections. Headings may be plain
/// (`Cause:`), bold (`**Cause:**`) or markdown (`### Cause`). An answer with no
/// recognizable heading is kept whole as additional information.
pub fn parse_error_analysis(text: &str) -> ErrorAnalysis {
    let headings: Vec<(String, usize, usize)> = heading_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            Some((name, whole.start(), whole.end()))
        })
        .collect();

    if headings.is_empty() {
        return ErrorAnalysis {
            additional_information: text.trim().to_string(),
            ..ErrorAnalysis::default()
        };
    }

    let mut analysis = ErrorAnalysis::default();
    for (i, (name, _, body_start)) in headings.iter().enumerate() {
        let body_end = headings.get(i + 1).map(|(_, start, _)| *start).unwrap_or(text.len());
        let body = text[*body_start..body_end]
            .trim_matches(|c: char| c == '*' || c.is_whitespace())
            .to_string();
        let slot = match name.as_str() {
            "cause" => &mut analysis.cause,
            "additional information" => &mut analysis.additional_information,
            _ => &mut analysis.solutions,
        };
        if slot.is_empty() {
            *slot = body;
        }
    }
    analysis
}

/// Runs one analysis request under the pipeline's timeout and retry policy.
pub async fn analyze_error(
    ai: &dyn DocumentAi,
    config: &PipelineConfig,
    error_context: &str,
) -> Result<ErrorAnalysisOutcome, ConversionError> {
    let payload = build_error_analysis_prompt(error_context, config.max_prompt_chars)?;
    let mut diagnostics = DiagnosticLog::new();
    let raw_response = analyze_with_retry(ai, &payload, config, &mut diagnostics).await?;
    info!("Error analysis answered with {} characters", raw_response.len());

    Ok(ErrorAnalysisOutcome {
        analysis: parse_error_analysis(&raw_response),
        raw_response,
        diagnostics: diagnostics.into_entries(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::box_client::fake::FakeDocumentAi;

    #[test]
    fn test_plain_sections() {
        let analysis = parse_error_analysis(
            "Cause: The schema file is missing the Contact object.\n\
             Solutions: 1. Add Contact to the schema.\n2. Re-run the conversion.\n\
             Additional Information: Box AI only sees the uploaded files.",
        );
        assert_eq!(analysis.cause, "The schema file is missing the Contact object.");
        assert_eq!(
            analysis.solutions,
            "1. Add Contact to the schema.\n2. Re-run the conversion."
        );
        assert_eq!(analysis.additional_information, "Box AI only sees the uploaded files.");
    }

    #[test]
    fn test_markdown_headings() {
        let analysis = parse_error_analysis(
            "### Cause\nToken expired.\n\n**Solutions:**\n- Refresh the token\n\n## Additional Information\nNone.",
        );
        assert_eq!(analysis.cause, "Token expired.");
        assert_eq!(analysis.solutions, "- Refresh the token");
        assert_eq!(analysis.additional_information, "None.");
    }

    #[test]
    fn test_answer_without_headings_is_kept() {
        let analysis = parse_error_analysis("  The token has expired.  ");
        assert_eq!(analysis.cause, "");
        assert_eq!(analysis.additional_information, "The token has expired.");
    }

    #[test]
    fn test_prompt_embeds_context_and_has_no_files() {
        let payload = build_error_analysis_prompt("ResponseParse: no table found", 10_000).unwrap();
        assert!(payload.file_refs.is_empty());
        assert!(payload.instruction_text.contains("```\nResponseParse: no table found\n```"));
        assert!(payload.instruction_text.starts_with(EXPERT_PREAMBLE));
    }

    #[test]
    fn test_long_context_is_truncated_to_fit() {
        let context = "x".repeat(20_000);
        let payload = build_error_analysis_prompt(&context, 2_000).unwrap();
        assert!(payload.char_count() <= 2_000);
        assert!(payload.instruction_text.contains("[truncated]"));
    }

    #[test]
    fn test_ceiling_below_instructions_is_payload_too_large() {
        let err = build_error_analysis_prompt("401 from Box", 100).unwrap_err();
        match err {
            ConversionError::PayloadTooLarge { limit, measured, max } => {
                assert_eq!(limit, PayloadLimit::PromptChars);
                assert_eq!(max, 100);
                assert!(measured > 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_analysis_prompt_is_never_sent() {
        let ai = FakeDocumentAi::answering("Cause: x");
        let config = PipelineConfig {
            max_prompt_chars: 100,
            ..PipelineConfig::default()
        };
        let err = analyze_error(&ai, &config, "401 from Box").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::PayloadTooLarge);
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_error_parses_answer() {
        let ai = FakeDocumentAi::answering("Cause: bad token\nSolutions: refresh it");
        let outcome = analyze_error(&ai, &PipelineConfig::default(), "401 from Box")
            .await
            .unwrap();
        assert_eq!(outcome.analysis.cause, "bad token");
        assert_eq!(outcome.analysis.solutions, "refresh it");
        assert_eq!(ai.calls(), 1);
    }
}
