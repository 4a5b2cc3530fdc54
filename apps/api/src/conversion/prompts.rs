// Box AI prompt templates for the conversion and error-analysis requests.
// Reuses cross-cutting fragments from box_client::prompts.

/// Column header the mapping answer must start with.
pub const MAPPING_CSV_HEADER: &str = "conga_field,box_field,confidence,notes";

/// Mapping request template.
/// Replace: {preamble}, {file_list}, {csv_header}, {grounding_instruction}, {csv_instruction}
pub const CONVERSION_PROMPT_TEMPLATE: &str = r#"{preamble}
Your task is to convert a Conga Composer template to Box Doc Gen format.

I have uploaded three files:
{file_list}

Please analyze these files and:
1. For each Conga merge field (format: «Field»), provide the equivalent Box Doc Gen merge field (format: {{Object.Field}}).
2. Use the SOQL query and the schema to determine the correct object, relationship and field names.
3. Rate each mapping: high (exact object and field match), medium (plausible match needing review), low (guess or no match).
4. {grounding_instruction}

RESPONSE FORMAT:
{csv_header}
Account_Name,{{Account.Name}},high,Direct mapping
Owner_Email,{{Account.Owner.Email}},medium,Relationship field via Owner

{csv_instruction}"#;

/// Header line introducing the inline extraction summary appended after the instructions.
pub const INLINE_CONTEXT_HEADER: &str = "EXTRACTED STRUCTURE (for reference; the files remain authoritative):";

/// Error analysis request template. Replace `{preamble}` and `{error_context}`.
pub const ERROR_ANALYSIS_PROMPT_TEMPLATE: &str = r#"{preamble}
Your task is to analyze an error that occurred while converting a Conga template to Box Doc Gen format.

ERROR CONTEXT:
```
{error_context}
```

INSTRUCTIONS:
1. Analyze the error and identify the most likely cause.
2. Suggest possible solutions or workarounds.
3. Provide any additional information that might help debugging.

RESPONSE FORMAT:
Cause: <one paragraph>
Solutions: <numbered list>
Additional Information: <anything else>"#;
