//! Query Analyzer: parses a SOQL query into its root object and a typed
//! graph of selected fields.
//!
//! Only syntax is checked here. Whether a field exists is the schema's concern
//! (see `schema::SchemaIndex::resolve`).

pub mod tokenizer;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticLog, Stage};
use crate::errors::ConversionError;
use crate::query::tokenizer::{find_keyword, split_top_level, Span};

/// Separator between relationship hops in a selected column.
pub const PATH_SEPARATOR: char = '.';

/// Field functions whose single argument is still a plain field reference.
const TRANSPARENT_FUNCTIONS: &[&str] = &["tolabel", "format", "convertcurrency", "converttimezone"];

/// Clauses that may follow the FROM target, in the order SOQL allows them.
const TRAILING_CLAUSES: &[&str] = &[
    "USING SCOPE",
    "WHERE",
    "WITH",
    "GROUP BY",
    "HAVING",
    "ORDER BY",
    "LIMIT",
    "OFFSET",
    "FOR",
];

/// Longest query excerpt stored with a syntax error.
const FRAGMENT_CHARS: usize = 200;

/// One selected column.
///
/// `relationship_path` is empty for root fields; otherwise it holds every
/// dotted segment before the field name, so its length equals the number of
/// separators in the column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFieldRef {
    /// Root object for direct fields, otherwise the last relationship hop.
    pub object_name: String,
    pub field_name: String,
    pub relationship_path: Vec<String>,
}

impl QueryFieldRef {
    fn from_column(root: &str, column: &str) -> Self {
        let mut segments: Vec<String> = column
            .split(PATH_SEPARATOR)
            .map(str::to_string)
            .collect();
        let field_name = segments.pop().unwrap_or_default();
        let object_name = segments
            .last()
            .cloned()
            .unwrap_or_else(|| root.to_string());
        Self {
            object_name,
            field_name,
            relationship_path: segments,
        }
    }

    pub fn is_related(&self) -> bool {
        !self.relationship_path.is_empty()
    }

    /// The column exactly as selected, e.g. `Account.Owner.Email`.
    pub fn dotted(&self) -> String {
        let mut parts = self.relationship_path.clone();
        parts.push(self.field_name.clone());
        parts.join(".")
    }
}

/// A parenthesised child-relationship subquery, e.g. `(SELECT Email FROM Contacts)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildQuery {
    pub relationship_name: String,
    pub fields: Vec<QueryFieldRef>,
}

/// Parsed form of one SOQL query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGraph {
    pub root_object: String,
    pub fields: Vec<QueryFieldRef>,
    pub child_queries: Vec<ChildQuery>,
    pub conditions: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl QueryGraph {
    /// `Object.Field` paths, prefixing root fields with the root object.
    pub fn field_paths(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| {
                if f.is_related() {
                    f.dotted()
                } else {
                    format!("{}.{}", self.root_object, f.field_name)
                }
            })
            .collect()
    }

    /// First relationship hop → fields selected through it.
    pub fn relationships(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for f in self.fields.iter().filter(|f| f.is_related()) {
            let hops = &f.relationship_path;
            let rest = hops[1..]
                .iter()
                .chain(std::iter::once(&f.field_name))
                .cloned()
                .collect::<Vec<_>>()
                .join(".");
            map.entry(hops[0].clone()).or_default().push(rest);
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.child_queries.is_empty()
    }
}

fn field_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("field path pattern is valid")
    })
}

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)(?:\s+[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("function pattern is valid")
    })
}

/// Parses `query` into a `QueryGraph`.
///
/// Fails with `QuerySyntax` only when there is no usable `SELECT ... FROM
/// <Object>` skeleton. Individual malformed columns are skipped with a warning.
pub fn analyze_query(
    query: &str,
    diagnostics: &mut DiagnosticLog,
) -> Result<QueryGraph, ConversionError> {
    let graph = parse_select(query, diagnostics)?;

    if graph.is_empty() {
        diagnostics.warn(
            Stage::QueryAnalysis,
            format!("Query on {} selects no usable columns", graph.root_object),
        );
    }
    diagnostics.info(
        Stage::QueryAnalysis,
        format!(
            "Parsed query on {}: {} column(s), {} relationship(s), {} child quer(ies)",
            graph.root_object,
            graph.fields.len(),
            graph.relationships().len(),
            graph.child_queries.len()
        ),
    );
    Ok(graph)
}

fn parse_select(query: &str, diagnostics: &mut DiagnosticLog) -> Result<QueryGraph, ConversionError> {
    let text = query.trim().trim_end_matches(';').trim_end();
    let syntax_error = |reason: &str| ConversionError::QuerySyntax {
        reason: reason.to_string(),
        fragment: text.chars().take(FRAGMENT_CHARS).collect(),
    };

    let from = find_keyword(text, "FROM").ok_or_else(|| syntax_error("no FROM clause found"))?;
    let select = find_keyword(text, "SELECT")
        .filter(|s| s.end <= from.start)
        .ok_or_else(|| syntax_error("no SELECT clause before FROM"))?;

    let after_from = &text[from.end..];
    let target_start = after_from.len() - after_from.trim_start().len();
    let root_len = after_from[target_start..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    if root_len == 0 {
        return Err(syntax_error("FROM clause does not name an object"));
    }
    let root_object = after_from[target_start..target_start + root_len].to_string();
    let tail = &after_from[target_start + root_len..];

    let mut graph = QueryGraph {
        root_object,
        ..QueryGraph::default()
    };
    parse_trailing_clauses(tail, &mut graph, diagnostics);

    let select_list = &text[select.end..from.start];
    for (index, raw) in split_top_level(select_list, b',').into_iter().enumerate() {
        parse_column(raw.trim(), index, &mut graph, diagnostics);
    }

    Ok(graph)
}

fn parse_column(
    column: &str,
    index: usize,
    graph: &mut QueryGraph,
    diagnostics: &mut DiagnosticLog,
) {
    if column.is_empty() {
        diagnostics.warn(
            Stage::QueryAnalysis,
            format!("Skipped empty column at position {}", index + 1),
        );
        return;
    }

    if let Some(inner) = column.strip_prefix('(').and_then(|c| c.strip_suffix(')')) {
        match parse_select(inner, diagnostics) {
            Ok(child) => graph.child_queries.push(ChildQuery {
                relationship_name: child.root_object,
                fields: child.fields,
            }),
            Err(e) => diagnostics.warn_with_context(
                Stage::QueryAnalysis,
                format!("Skipped malformed subquery: {e}"),
                column,
            ),
        }
        return;
    }

    let mut field = column;
    if let Some(caps) = function_regex().captures(column) {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let arg = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if TRANSPARENT_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str()) {
            field = arg;
        } else {
            diagnostics.warn_with_context(
                Stage::QueryAnalysis,
                format!("Skipped computed column using {name}()"),
                column,
            );
            return;
        }
    }

    if !field_path_regex().is_match(field) {
        diagnostics.warn_with_context(
            Stage::QueryAnalysis,
            format!("Skipped malformed column at position {}", index + 1),
            column,
        );
        return;
    }

    graph
        .fields
        .push(QueryFieldRef::from_column(&graph.root_object, field));
}

fn parse_trailing_clauses(tail: &str, graph: &mut QueryGraph, diagnostics: &mut DiagnosticLog) {
    let mut found: Vec<(&str, Span)> = TRAILING_CLAUSES
        .iter()
        .filter_map(|kw| find_keyword(tail, kw).map(|span| (*kw, span)))
        .collect();
    found.sort_by_key(|(_, span)| span.start);

    for (i, (keyword, span)) in found.iter().enumerate() {
        let body_end = found.get(i + 1).map(|(_, next)| next.start).unwrap_or(tail.len());
        let body = tail[span.end..body_end].trim();
        match *keyword {
            "WHERE" => graph.conditions = Some(body.to_string()),
            "ORDER BY" => graph.order_by = Some(body.to_string()),
            "LIMIT" => match body.parse::<u64>() {
                Ok(n) => graph.limit = Some(n),
                Err(_) => diagnostics.warn_with_context(
                    Stage::QueryAnalysis,
                    "Ignored non-numeric LIMIT",
                    body,
                ),
            },
            _ => {}
        }
    }
}
