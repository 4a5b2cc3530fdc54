//! Schema Normalizer: turns a Box-Salesforce schema description into a
//! `SchemaIndex` keyed by `(target_object, target_field)`.
//!
//! Two input shapes are accepted:
//! - a flat field list, either a top-level array or `{"fields": [...]}`;
//! - a JSON-Schema-like tree where every object with `properties` declares an
//!   object, and nested object properties declare relationships.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::{DiagnosticLog, Stage};
use crate::errors::ConversionError;
use crate::query::QueryFieldRef;

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Date,
    Datetime,
    Number,
    Currency,
    Percent,
    Boolean,
    Picklist,
    Reference,
    Email,
    Phone,
    Url,
    Other(String),
}

impl DataType {
    /// Maps Salesforce field types and JSON-Schema primitive names onto one vocabulary.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "string" | "text" | "textarea" | "longtextarea" | "richtextarea" => DataType::Text,
            "date" => DataType::Date,
            "datetime" | "date-time" | "time" => DataType::Datetime,
            "number" | "integer" | "int" | "double" | "long" | "decimal" => DataType::Number,
            "currency" => DataType::Currency,
            "percent" => DataType::Percent,
            "boolean" | "bool" | "checkbox" => DataType::Boolean,
            "picklist" | "multipicklist" | "enum" | "combobox" => DataType::Picklist,
            "reference" | "lookup" | "masterdetail" | "id" => DataType::Reference,
            "email" => DataType::Email,
            "phone" => DataType::Phone,
            "url" | "uri" => DataType::Url,
            other => DataType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Number => "number",
            DataType::Currency => "currency",
            DataType::Percent => "percent",
            DataType::Boolean => "boolean",
            DataType::Picklist => "picklist",
            DataType::Reference => "reference",
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Url => "url",
            DataType::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub target_object: String,
    pub target_field: String,
    pub data_type: DataType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl SchemaField {
    pub fn path(&self) -> String {
        format!("{}.{}", self.target_object, self.target_field)
    }
}

/// Normalized schema: unique `(object, field)` keys plus relationship edges
/// (`object → relationship name → related object`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaIndex {
    fields: BTreeMap<(String, String), SchemaField>,
    relationships: BTreeMap<String, BTreeMap<String, String>>,
}

impl SchemaIndex {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, object: &str, field: &str) -> Option<&SchemaField> {
        self.fields
            .get(&(object.to_string(), field.to_string()))
            .or_else(|| {
                // Salesforce API names are case-insensitive.
                self.fields.values().find(|f| {
                    f.target_object.eq_ignore_ascii_case(object)
                        && f.target_field.eq_ignore_ascii_case(field)
                })
            })
    }

    /// Fields in key order (object, then field).
    pub fn fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.values()
    }

    pub fn objects(&self) -> Vec<&str> {
        let mut objects: Vec<&str> = self.fields.keys().map(|(o, _)| o.as_str()).collect();
        objects.dedup();
        objects
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.values().map(BTreeMap::len).sum()
    }

    pub fn related_object(&self, object: &str, relationship: &str) -> Option<&str> {
        self.relationships
            .iter()
            .find(|(o, _)| o.eq_ignore_ascii_case(object))
            .and_then(|(_, rels)| {
                rels.iter()
                    .find(|(r, _)| r.eq_ignore_ascii_case(relationship))
                    .map(|(_, target)| target.as_str())
            })
    }

    /// Finds the schema field a query column refers to.
    ///
    /// Walks the relationship path from `root` first. If the walk breaks, the
    /// first path segment and then the last one are tried as object names.
    pub fn resolve(&self, root: &str, field: &QueryFieldRef) -> Option<&SchemaField> {
        let path = &field.relationship_path;
        if path.is_empty() {
            return self.get(root, &field.field_name);
        }

        let mut current = root.to_string();
        let mut walked = true;
        for hop in path {
            match self.related_object(&current, hop) {
                Some(next) => current = next.to_string(),
                None => {
                    walked = false;
                    break;
                }
            }
        }
        if walked {
            if let Some(found) = self.get(&current, &field.field_name) {
                return Some(found);
            }
        }

        self.get(&path[0], &field.field_name)
            .or_else(|| self.get(&field.object_name, &field.field_name))
    }

    fn insert(&mut self, field: SchemaField, diagnostics: &mut DiagnosticLog) {
        let key = (field.target_object.clone(), field.target_field.clone());
        if self.fields.insert(key, field.clone()).is_some() {
            diagnostics.warn(
                Stage::SchemaNormalization,
                format!(
                    "Duplicate schema field {}; the later definition replaces the earlier one",
                    field.path()
                ),
            );
        }
    }

    fn relate(&mut self, object: &str, relationship: &str, target: &str) {
        self.relationships
            .entry(object.to_string())
            .or_default()
            .insert(relationship.to_string(), target.to_string());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

/// Parses a schema description.
///
/// Fails with `SchemaFormat` when the input is not JSON at all or is a bare
/// scalar. Malformed entries are skipped with one warning each.
pub fn normalize_schema(
    input: &str,
    diagnostics: &mut DiagnosticLog,
) -> Result<SchemaIndex, ConversionError> {
    let value: Value = serde_json::from_str(input).map_err(|e| ConversionError::SchemaFormat {
        reason: format!("schema is not valid JSON: {e}"),
    })?;

    let mut index = SchemaIndex::default();
    match &value {
        Value::Array(entries) => read_flat_list(entries, &mut index, diagnostics),
        Value::Object(map) => match map.get("fields") {
            Some(Value::Array(entries)) => read_flat_list(entries, &mut index, diagnostics),
            _ => walk_tree(map, "", &mut index, diagnostics),
        },
        _ => {
            return Err(ConversionError::SchemaFormat {
                reason: "schema must be a JSON object or array".to_string(),
            })
        }
    }

    if index.is_empty() {
        diagnostics.warn(Stage::SchemaNormalization, "Schema declares no usable fields");
    }
    diagnostics.info(
        Stage::SchemaNormalization,
        format!(
            "Normalized schema: {} field(s) across {} object(s), {} relationship(s)",
            index.len(),
            index.objects().len(),
            index.relationship_count()
        ),
    );
    Ok(index)
}

fn str_field<'a>(entry: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn read_flat_list(entries: &[Value], index: &mut SchemaIndex, diagnostics: &mut DiagnosticLog) {
    for (i, entry) in entries.iter().enumerate() {
        let Some(entry) = entry.as_object() else {
            diagnostics.warn(
                Stage::SchemaNormalization,
                format!("Skipped schema entry {}: not an object", i + 1),
            );
            continue;
        };
        let Some(field) = str_field(entry, &["targetField", "target_field", "field", "name"]) else {
            diagnostics.warn(
                Stage::SchemaNormalization,
                format!("Skipped schema entry {}: missing targetField", i + 1),
            );
            continue;
        };
        let Some(object) = str_field(entry, &["targetObject", "target_object", "object"]) else {
            diagnostics.warn(
                Stage::SchemaNormalization,
                format!("Skipped schema entry {} ({field}): missing targetObject", i + 1),
            );
            continue;
        };

        let data_type = str_field(entry, &["dataType", "data_type", "type"])
            .map(DataType::parse)
            .unwrap_or(DataType::Text);
        if let (Some(rel), Some(target)) = (
            str_field(entry, &["relationshipName", "relationship_name"]),
            str_field(entry, &["referenceTo", "reference_to"]),
        ) {
            index.relate(object, rel, target);
        }

        index.insert(
            SchemaField {
                target_object: object.to_string(),
                target_field: field.to_string(),
                data_type,
                required: entry.get("required").and_then(Value::as_bool).unwrap_or(false),
                description: str_field(entry, &["description", "label"])
                    .unwrap_or_default()
                    .to_string(),
            },
            diagnostics,
        );
    }
}

/// JSON-Schema `type` may be a string or an array such as `["string", "null"]`.
fn json_type(def: &Map<String, Value>) -> &str {
    match def.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string"),
        _ => "string",
    }
}

fn json_data_type(def: &Map<String, Value>) -> DataType {
    let format = def.get("format").and_then(Value::as_str);
    match (json_type(def), format) {
        ("string", Some(format)) => DataType::parse(format),
        (_, _) if def.contains_key("enum") => DataType::Picklist,
        (t, _) => DataType::parse(t),
    }
}

fn object_name(def: &Map<String, Value>, path: &str) -> Option<String> {
    def.get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| path.rsplit('.').next().filter(|s| !s.is_empty()).map(str::to_string))
}

fn walk_tree(
    node: &Map<String, Value>,
    path: &str,
    index: &mut SchemaIndex,
    diagnostics: &mut DiagnosticLog,
) {
    if let Some(Value::Object(properties)) = node.get("properties") {
        match object_name(node, path) {
            Some(object) => read_properties(&object, node, properties, path, index, diagnostics),
            None => diagnostics.warn(
                Stage::SchemaNormalization,
                "Skipped top-level properties: no title names the object",
            ),
        }
    }

    for (key, value) in node.iter().filter(|(k, _)| k.as_str() != "properties") {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        match value {
            Value::Object(child) => walk_tree(child, &child_path, index, diagnostics),
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    walk_tree(item, &child_path, index, diagnostics);
                }
            }
            _ => {}
        }
    }
}

fn read_properties(
    object: &str,
    node: &Map<String, Value>,
    properties: &Map<String, Value>,
    path: &str,
    index: &mut SchemaIndex,
    diagnostics: &mut DiagnosticLog,
) {
    let required: Vec<&str> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, def) in properties {
        let Some(def) = def.as_object() else {
            diagnostics.warn(
                Stage::SchemaNormalization,
                format!("Skipped schema property {object}.{name}: definition is not an object"),
            );
            continue;
        };

        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };
        if json_type(def) == "object" && def.contains_key("properties") {
            if let Some(related) = object_name(def, &child_path) {
                index.relate(object, name, &related);
            }
            walk_tree(def, &child_path, index, diagnostics);
            continue;
        }

        index.insert(
            SchemaField {
                target_object: object.to_string(),
                target_field: name.clone(),
                data_type: json_data_type(def),
                required: required.contains(&name.as_str()),
                description: def
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            diagnostics,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    fn normalize(input: &str) -> (SchemaIndex, DiagnosticLog) {
        let mut log = DiagnosticLog::new();
        let index = normalize_schema(input, &mut log).unwrap();
        (index, log)
    }

    fn field_ref(object: &str, field: &str, path: &[&str]) -> QueryFieldRef {
        QueryFieldRef {
            object_name: object.to_string(),
            field_name: field.to_string(),
            relationship_path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_flat_list_with_missing_target_field_skips_one_entry() {
        let (index, log) = normalize(
            r#"[
                {"targetObject": "Account", "targetField": "Name", "dataType": "text", "required": true},
                {"targetObject": "Account", "dataType": "text"},
                {"targetObject": "Contact", "targetField": "Email", "dataType": "email"}
            ]"#,
        );
        assert_eq!(index.len(), 2);
        assert_eq!(log.count(Severity::Warning), 1);
        assert!(log.entries()[0].message.contains("missing targetField"));

        let name = index.get("Account", "Name").unwrap();
        assert!(name.required);
        assert_eq!(index.get("Contact", "Email").unwrap().data_type, DataType::Email);
    }

    #[test]
    fn test_fields_wrapper_and_alias_keys() {
        let (index, _) = normalize(
            r#"{"fields": [{"object": "Opportunity", "field": "Amount", "type": "currency"}]}"#,
        );
        assert_eq!(
            index.get("Opportunity", "Amount").unwrap().data_type,
            DataType::Currency
        );
    }

    #[test]
    fn test_duplicate_key_last_write_wins_with_warning() {
        let (index, log) = normalize(
            r#"[
                {"targetObject": "Account", "targetField": "Name", "dataType": "text"},
                {"targetObject": "Account", "targetField": "Name", "dataType": "picklist"}
            ]"#,
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("Account", "Name").unwrap().data_type, DataType::Picklist);
        assert_eq!(log.count(Severity::Warning), 1);
        assert!(log.entries()[0].message.contains("Duplicate schema field Account.Name"));
    }

    #[test]
    fn test_invalid_json_is_schema_format_error() {
        let mut log = DiagnosticLog::new();
        let err = normalize_schema("{not json", &mut log).unwrap_err();
        assert!(matches!(err, ConversionError::SchemaFormat { .. }));
        let err = normalize_schema("42", &mut log).unwrap_err();
        assert!(matches!(err, ConversionError::SchemaFormat { .. }));
    }

    #[test]
    fn test_json_schema_tree_with_relationship() {
        let (index, log) = normalize(
            r#"{
                "title": "Account",
                "type": "object",
                "required": ["Name"],
                "properties": {
                    "Name": {"type": "string", "description": "Account name"},
                    "CreatedDate": {"type": "string", "format": "date-time"},
                    "Rating": {"type": "string", "enum": ["Hot", "Cold"]},
                    "Owner": {
                        "title": "User",
                        "type": "object",
                        "properties": {"Email": {"type": ["string", "null"], "format": "email"}}
                    }
                }
            }"#,
        );
        assert!(!log.has_warnings());
        assert_eq!(index.len(), 4);
        assert!(index.get("Account", "Name").unwrap().required);
        assert_eq!(index.get("Account", "CreatedDate").unwrap().data_type, DataType::Datetime);
        assert_eq!(index.get("Account", "Rating").unwrap().data_type, DataType::Picklist);
        assert_eq!(index.related_object("Account", "Owner"), Some("User"));

        let resolved = index
            .resolve("Account", &field_ref("Owner", "Email", &["Owner"]))
            .unwrap();
        assert_eq!(resolved.path(), "User.Email");
    }

    #[test]
    fn test_definitions_are_named_by_key() {
        let (index, _) = normalize(
            r#"{"definitions": {"Contact": {"properties": {"Email": {"type": "string"}}}}}"#,
        );
        assert!(index.get("Contact", "Email").is_some());
    }

    #[test]
    fn test_resolve_falls_back_to_segment_as_object() {
        let (index, _) = normalize(
            r#"[
                {"targetObject": "Account", "targetField": "Name"},
                {"targetObject": "Contact", "targetField": "Email"}
            ]"#,
        );
        let root = field_ref("Account", "Name", &[]);
        assert_eq!(index.resolve("Account", &root).unwrap().path(), "Account.Name");

        let related = field_ref("Contact", "Email", &["Contact"]);
        assert_eq!(index.resolve("Account", &related).unwrap().path(), "Contact.Email");

        let missing = field_ref("Contact", "Phone", &["Contact"]);
        assert!(index.resolve("Account", &missing).is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let (index, _) = normalize(r#"[{"targetObject": "Account", "targetField": "Name"}]"#);
        assert!(index.get("account", "NAME").is_some());
    }

    #[test]
    fn test_data_type_vocabulary() {
        assert_eq!(DataType::parse("Checkbox"), DataType::Boolean);
        assert_eq!(DataType::parse("integer"), DataType::Number);
        assert_eq!(DataType::parse("lookup"), DataType::Reference);
        assert_eq!(DataType::parse("geolocation"), DataType::Other("geolocation".into()));
        assert_eq!(DataType::parse("geolocation").as_str(), "geolocation");
    }

    #[test]
    fn test_empty_schema_warns() {
        let (index, log) = normalize("[]");
        assert!(index.is_empty());
        assert!(log.has_warnings());
    }
}
