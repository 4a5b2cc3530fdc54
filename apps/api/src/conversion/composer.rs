//! Prompt Composer: merges extracted template, query and schema structure
//! with the uploaded file handles into one bounded `PromptPayload`.
//!
//! Composition is a pure function of its inputs: identical inputs always give
//! byte-identical instruction and context text. The only side effect is
//! appending diagnostics.

use serde::Serialize;

use crate::box_client::prompts::{
    CSV_ONLY_INSTRUCTION, EXPERT_PREAMBLE, FILE_GROUNDING_INSTRUCTION,
};
use crate::box_client::FileRef;
use crate::config::PipelineConfig;
use crate::conversion::prompts::{
    CONVERSION_PROMPT_TEMPLATE, INLINE_CONTEXT_HEADER, MAPPING_CSV_HEADER,
};
use crate::diagnostics::{DiagnosticLog, Stage};
use crate::errors::{ConversionError, PayloadLimit};
use crate::query::QueryGraph;
use crate::schema::{SchemaField, SchemaIndex};
use crate::template::MergeField;

/// Request payload for one `DocumentAi::analyze` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPayload {
    pub instruction_text: String,
    /// Always template, query, schema.
    pub file_refs: Vec<FileRef>,
    pub inline_context: String,
}

impl PromptPayload {
    /// Full prompt text as sent to the service.
    pub fn prompt(&self) -> String {
        if self.inline_context.is_empty() {
            self.instruction_text.clone()
        } else {
            format!("{}\n\n{}", self.instruction_text, self.inline_context)
        }
    }

    pub fn char_count(&self) -> usize {
        self.prompt().chars().count()
    }
}

/// Handles of the three uploaded inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFiles {
    pub template: FileRef,
    pub query: FileRef,
    pub schema: FileRef,
}

impl UploadedFiles {
    pub fn ordered(&self) -> Vec<FileRef> {
        vec![self.template.clone(), self.query.clone(), self.schema.clone()]
    }
}

/// Read-only outputs of stages 1 to 3 plus the upload handles.
pub struct CompositionInput<'a> {
    pub merge_fields: &'a [MergeField],
    /// `None` when the query could not be parsed.
    pub query: Option<&'a QueryGraph>,
    pub schema: &'a SchemaIndex,
    pub files: &'a UploadedFiles,
}

/// How much inline context to render. Each step drops one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Full,
    WithoutContext,
    FieldsOnly,
}

struct Resolution<'a> {
    column: String,
    target: Option<&'a SchemaField>,
}

// ────────────────────────────────────────────────────────────────────────────
// Composition
// ────────────────────────────────────────────────────────────────────────────

/// Builds the payload, applying the merge-field budget first and then dropping
/// context snippets and the schema summary until the prompt fits.
///
/// Fails with `PayloadTooLarge` when even the reduced prompt exceeds the
/// character ceiling, or when the three file handles exceed the file limit.
pub fn compose_prompt(
    input: &CompositionInput<'_>,
    config: &PipelineConfig,
    diagnostics: &mut DiagnosticLog,
) -> Result<PromptPayload, ConversionError> {
    let file_refs = input.files.ordered();
    if file_refs.len() > config.max_file_refs {
        return Err(ConversionError::PayloadTooLarge {
            limit: PayloadLimit::FileRefs,
            measured: file_refs.len(),
            max: config.max_file_refs,
        });
    }

    let total = input.merge_fields.len();
    let kept = &input.merge_fields[..total.min(config.max_merge_fields)];
    if kept.len() < total {
        diagnostics.warn(
            Stage::PromptComposition,
            format!(
                "Merge-field budget of {} exceeded: kept the first {} of {}, dropped {}",
                config.max_merge_fields,
                kept.len(),
                total,
                total - kept.len()
            ),
        );
    }

    let resolutions = resolve_query_fields(input.query, input.schema, diagnostics);
    let instruction_text = instruction_text(input.files);

    let mut measured = 0;
    for detail in [Detail::Full, Detail::WithoutContext, Detail::FieldsOnly] {
        let payload = PromptPayload {
            instruction_text: instruction_text.clone(),
            file_refs: file_refs.clone(),
            inline_context: inline_context(kept, input.query, &resolutions, input.schema, detail),
        };
        measured = payload.char_count();
        if measured <= config.max_prompt_chars {
            diagnostics.info(
                Stage::PromptComposition,
                format!(
                    "Composed prompt: {} characters, {} merge field(s), {} file reference(s)",
                    measured,
                    kept.len(),
                    payload.file_refs.len()
                ),
            );
            return Ok(payload);
        }

        let dropped = match detail {
            Detail::Full => "merge-field context snippets",
            Detail::WithoutContext => "the schema summary",
            Detail::FieldsOnly => break,
        };
        diagnostics.warn(
            Stage::PromptComposition,
            format!(
                "Prompt is {measured} characters (limit {}); dropped {dropped}",
                config.max_prompt_chars
            ),
        );
    }

    Err(ConversionError::PayloadTooLarge {
        limit: PayloadLimit::PromptChars,
        measured,
        max: config.max_prompt_chars,
    })
}

fn resolve_query_fields<'a>(
    query: Option<&QueryGraph>,
    schema: &'a SchemaIndex,
    diagnostics: &mut DiagnosticLog,
) -> Vec<Resolution<'a>> {
    let Some(query) = query else {
        return Vec::new();
    };

    query
        .fields
        .iter()
        .zip(query.field_paths())
        .map(|(field, column)| {
            let target = schema.resolve(&query.root_object, field);
            if target.is_none() && !schema.is_empty() {
                diagnostics.warn(
                    Stage::PromptComposition,
                    format!("Query field {column} has no matching schema field"),
                );
            }
            Resolution { column, target }
        })
        .collect()
}

fn instruction_text(files: &UploadedFiles) -> String {
    let file_list = format!(
        "1. The Conga template: {}\n2. The SOQL query: {}\n3. The Box-Salesforce JSON schema: {}",
        files.template.name, files.query.name, files.schema.name
    );
    CONVERSION_PROMPT_TEMPLATE
        .replace("{preamble}", EXPERT_PREAMBLE)
        .replace("{file_list}", &file_list)
        .replace("{csv_header}", MAPPING_CSV_HEADER)
        .replace("{grounding_instruction}", FILE_GROUNDING_INSTRUCTION)
        .replace("{csv_instruction}", CSV_ONLY_INSTRUCTION)
}

fn inline_context(
    fields: &[MergeField],
    query: Option<&QueryGraph>,
    resolutions: &[Resolution<'_>],
    schema: &SchemaIndex,
    detail: Detail,
) -> String {
    if fields.is_empty() && query.is_none() && schema.is_empty() {
        return String::new();
    }

    let mut out = String::from(INLINE_CONTEXT_HEADER);

    out.push_str(&format!("\n\nMERGE FIELDS ({}):", fields.len()));
    for field in fields {
        out.push_str(&format!("\n{}. {}", field.position_index + 1, field.delimited()));
        if detail == Detail::Full {
            let context = field.raw_context.split_whitespace().collect::<Vec<_>>().join(" ");
            out.push_str(&format!(" | context: {context}"));
        }
    }

    match query {
        Some(query) => {
            out.push_str(&format!("\n\nSOQL QUERY (root object: {}):", query.root_object));
            for r in resolutions {
                match r.target {
                    Some(t) => out.push_str(&format!(
                        "\n- {} -> {} [{}]",
                        r.column,
                        t.path(),
                        t.data_type.as_str()
                    )),
                    None => out.push_str(&format!("\n- {} -> not in schema", r.column)),
                }
            }
            for child in &query.child_queries {
                let names: Vec<&str> = child.fields.iter().map(|f| f.field_name.as_str()).collect();
                out.push_str(&format!(
                    "\n- child records {}: {}",
                    child.relationship_name,
                    names.join(", ")
                ));
            }
            if let Some(conditions) = &query.conditions {
                out.push_str(&format!("\nWHERE {conditions}"));
            }
        }
        None => out.push_str("\n\nSOQL QUERY: could not be parsed; rely on the attached file."),
    }

    if detail != Detail::FieldsOnly && !schema.is_empty() {
        out.push_str("\n\nSCHEMA SUMMARY:");
        for object in schema.objects() {
            let fields: Vec<String> = schema
                .fields()
                .filter(|f| f.target_object == object)
                .map(|f| {
                    if f.required {
                        format!("{} [{}, required]", f.target_field, f.data_type.as_str())
                    } else {
                        format!("{} [{}]", f.target_field, f.data_type.as_str())
                    }
                })
                .collect();
            out.push_str(&format!("\n{object}: {}", fields.join(", ")));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::query::analyze_query;
    use crate::schema::normalize_schema;

    fn files() -> UploadedFiles {
        let file = |id: &str, name: &str| FileRef {
            id: id.to_string(),
            name: name.to_string(),
        };
        UploadedFiles {
            template: file("t1", "conga_template_1.docx"),
            query: file("q1", "soql_query_1.txt"),
            schema: file("s1", "schema_1.json"),
        }
    }

    fn merge_fields(tokens: &[&str]) -> Vec<MergeField> {
        tokens
            .iter()
            .enumerate()
            .map(|(i, t)| MergeField {
                token: t.to_string(),
                raw_context: format!("Line with\n«{t}» in it"),
                position_index: i,
            })
            .collect()
    }

    fn fixture() -> (QueryGraph, SchemaIndex) {
        let mut log = DiagnosticLog::new();
        let query = analyze_query("SELECT Account.Name, Contact.Email FROM Account", &mut log).unwrap();
        let schema = normalize_schema(
            r#"[{"targetObject": "Account", "targetField": "Name", "required": true},
                {"targetObject": "Contact", "targetField": "Email", "dataType": "email"}]"#,
            &mut log,
        )
        .unwrap();
        (query, schema)
    }

    fn compose(
        fields: &[MergeField],
        query: &QueryGraph,
        schema: &SchemaIndex,
        config: &PipelineConfig,
    ) -> (Result<PromptPayload, ConversionError>, DiagnosticLog) {
        let files = files();
        let input = CompositionInput {
            merge_fields: fields,
            query: Some(query),
            schema,
            files: &files,
        };
        let mut log = DiagnosticLog::new();
        let result = compose_prompt(&input, config, &mut log);
        (result, log)
    }

    #[test]
    fn test_composition_is_deterministic() {
        let (query, schema) = fixture();
        let fields = merge_fields(&["Account_Name", "Contact_Email"]);
        let config = PipelineConfig::default();

        let (first, _) = compose(&fields, &query, &schema, &config);
        let (second, _) = compose(&fields, &query, &schema, &config);
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.instruction_text, second.instruction_text);
        assert_eq!(first.inline_context, second.inline_context);
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_refs_are_template_query_schema() {
        let (query, schema) = fixture();
        let (payload, _) = compose(&[], &query, &schema, &PipelineConfig::default());
        let ids: Vec<_> = payload.unwrap().file_refs.into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["t1", "q1", "s1"]);
    }

    #[test]
    fn test_instruction_text_names_files_and_format() {
        let (query, schema) = fixture();
        let (payload, _) = compose(&[], &query, &schema, &PipelineConfig::default());
        let text = payload.unwrap().instruction_text;
        assert!(text.starts_with(EXPERT_PREAMBLE));
        assert!(text.contains("conga_template_1.docx"));
        assert!(text.contains(MAPPING_CSV_HEADER));
        assert!(text.contains("{{Account.Name}}"));
        assert!(!text.contains("{file_list}"));
    }

    #[test]
    fn test_inline_context_lists_resolved_fields() {
        let (query, schema) = fixture();
        let fields = merge_fields(&["Account_Name"]);
        let (payload, log) = compose(&fields, &query, &schema, &PipelineConfig::default());
        let context = payload.unwrap().inline_context;
        assert!(context.contains("1. «Account_Name» | context: Line with «Account_Name» in it"));
        assert!(context.contains("- Account.Name -> Account.Name [text]"));
        assert!(context.contains("Account: Name [text, required]"));
        assert!(!log.has_warnings());
    }

    #[test]
    fn test_truncation_keeps_first_b_and_warns_once_with_dropped_count() {
        let (query, schema) = fixture();
        let fields = merge_fields(&["F0", "F1", "F2", "F3", "F4"]);
        let config = PipelineConfig {
            max_merge_fields: 3,
            ..PipelineConfig::default()
        };
        let (payload, log) = compose(&fields, &query, &schema, &config);
        let context = payload.unwrap().inline_context;

        assert!(context.contains("MERGE FIELDS (3):"));
        for kept in ["«F0»", "«F1»", "«F2»"] {
            assert!(context.contains(kept));
        }
        assert!(!context.contains("«F3»"));
        assert!(!context.contains("«F4»"));

        let budget_warnings: Vec<_> = log
            .entries()
            .iter()
            .filter(|e| e.severity == Severity::Warning && e.message.contains("budget"))
            .collect();
        assert_eq!(budget_warnings.len(), 1);
        assert!(budget_warnings[0].message.contains("dropped 2"));
    }

    #[test]
    fn test_oversized_prompt_drops_context_before_failing() {
        let (query, schema) = fixture();
        let fields = merge_fields(&["Account_Name", "Contact_Email"]);
        let resolutions = resolve_query_fields(Some(&query), &schema, &mut DiagnosticLog::new());
        let lean = PromptPayload {
            instruction_text: instruction_text(&files()),
            file_refs: files().ordered(),
            inline_context: inline_context(
                &fields,
                Some(&query),
                &resolutions,
                &schema,
                Detail::WithoutContext,
            ),
        };
        let config = PipelineConfig {
            max_prompt_chars: lean.char_count(),
            ..PipelineConfig::default()
        };

        let (payload, log) = compose(&fields, &query, &schema, &config);
        let payload = payload.unwrap();
        assert!(!payload.inline_context.contains("| context:"));
        assert!(payload.char_count() <= config.max_prompt_chars);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message.contains("dropped merge-field context snippets")));
    }

    #[test]
    fn test_prompt_that_cannot_fit_is_payload_too_large() {
        let (query, schema) = fixture();
        let config = PipelineConfig {
            max_prompt_chars: 100,
            ..PipelineConfig::default()
        };
        let (result, log) = compose(&merge_fields(&["A"]), &query, &schema, &config);
        match result.unwrap_err() {
            ConversionError::PayloadTooLarge { limit, max, measured } => {
                assert_eq!(limit, PayloadLimit::PromptChars);
                assert_eq!(max, 100);
                assert!(measured > 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(log.count(Severity::Warning), 2);
    }

    #[test]
    fn test_file_ref_limit_is_enforced() {
        let (query, schema) = fixture();
        let config = PipelineConfig {
            max_file_refs: 2,
            ..PipelineConfig::default()
        };
        let (result, _) = compose(&[], &query, &schema, &config);
        assert!(matches!(
            result,
            Err(ConversionError::PayloadTooLarge {
                limit: PayloadLimit::FileRefs,
                measured: 3,
                max: 2
            })
        ));
    }

    #[test]
    fn test_unresolved_query_fields_warn_and_are_marked() {
        let mut log = DiagnosticLog::new();
        let query = analyze_query("SELECT Name, Owner.Phone FROM Account", &mut log).unwrap();
        let schema =
            normalize_schema(r#"[{"targetObject": "Account", "targetField": "Name"}]"#, &mut log)
                .unwrap();
        let (payload, log) = compose(&[], &query, &schema, &PipelineConfig::default());
        assert!(payload
            .unwrap()
            .inline_context
            .contains("- Owner.Phone -> not in schema"));
        assert_eq!(log.count(Severity::Warning), 1);
    }

    #[test]
    fn test_unparsed_query_is_noted() {
        let (_, schema) = fixture();
        let files = files();
        let input = CompositionInput {
            merge_fields: &[],
            query: None,
            schema: &schema,
            files: &files,
        };
        let mut log = DiagnosticLog::new();
        let payload = compose_prompt(&input, &PipelineConfig::default(), &mut log).unwrap();
        assert!(payload.inline_context.contains("could not be parsed"));
    }
}
