//! Filter compilation shared by search, preview, export and delete.
//!
//! Callers hand in a loose JSON object (`{"type": "pdf", "metadata.author":
//! "ann"}`); [`compile_filters`] validates it into typed [`FilterExpr`]s
//! before anything touches the store. Keys are resolved in this order:
//!
//! 1. `metadata.<name>`: metadata field equality
//! 2. legacy keys `type`, `namespace`, `category`: metadata field equality
//! 3. `*_like` keys: separator-normalized, case-insensitive pattern match
//! 4. anything else: equality on an allow-listed chunk column
//!
//! Expressions only ever carry values; the store decides which fixed SQL
//! tokens each variant renders to and binds every value as a parameter.

use crate::error::{Result, RetrieverError};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix selecting an arbitrary metadata field.
pub const METADATA_PREFIX: &str = "metadata.";

/// Legacy top-level keys that address metadata fields.
pub const LEGACY_METADATA_KEYS: &[&str] = &["type", "namespace", "category"];

/// Chunk columns that may be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkColumn {
    DocumentId,
    ChunkIndex,
    SourceUri,
    TextContent,
}

impl ChunkColumn {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "document_id" => Some(ChunkColumn::DocumentId),
            "chunk_index" => Some(ChunkColumn::ChunkIndex),
            "source_uri" => Some(ChunkColumn::SourceUri),
            "text_content" => Some(ChunkColumn::TextContent),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ChunkColumn::DocumentId => "document_id",
            ChunkColumn::ChunkIndex => "chunk_index",
            ChunkColumn::SourceUri => "source_uri",
            ChunkColumn::TextContent => "text_content",
        }
    }
}

/// What a pattern filter is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTarget {
    /// `source_uri` or the `file_path` / `original_path` metadata fields
    Location,
}

impl PatternTarget {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "source_uri_like" | "path_like" => Some(PatternTarget::Location),
            _ => None,
        }
    }
}

/// Scalar filter value, bound as a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl FilterValue {
    fn from_json(key: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(FilterValue::Text(s.clone())),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(FilterValue::Integer(i)),
                None => n.as_f64().map(FilterValue::Real).ok_or_else(|| {
                    RetrieverError::validation(format!("Filter '{key}' has an unusable number"))
                }),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => Err(RetrieverError::validation(
                format!("Filter '{key}' must be a string, number or boolean"),
            )),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(s) => write!(f, "{s}"),
            FilterValue::Integer(i) => write!(f, "{i}"),
            FilterValue::Real(r) => write!(f, "{r}"),
            FilterValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One validated filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Equals {
        column: ChunkColumn,
        value: FilterValue,
    },
    MetadataEquals {
        key: String,
        value: FilterValue,
    },
    /// `pattern` is already in SQL `LIKE` syntax with normalized separators
    PatternMatch {
        target: PatternTarget,
        pattern: String,
    },
}

/// Compile a filter map into predicates, all of which must hold.
///
/// An empty map yields an empty list; callers that must not run unfiltered
/// (delete) check for that themselves.
pub fn compile_filters(filters: &Map<String, Value>) -> Result<Vec<FilterExpr>> {
    filters
        .iter()
        .map(|(key, value)| compile_entry(key, value))
        .collect()
}

fn compile_entry(key: &str, value: &Value) -> Result<FilterExpr> {
    if let Some(name) = key.strip_prefix(METADATA_PREFIX) {
        if name.is_empty() {
            return Err(RetrieverError::validation(
                "Metadata filter needs a field name after 'metadata.'",
            ));
        }
        // field names end up quoted inside a JSON path
        if name.chars().any(|c| c == '"' || c.is_control()) {
            return Err(RetrieverError::validation(format!(
                "Metadata field name '{name}' contains quotes or control characters"
            )));
        }
        return Ok(FilterExpr::MetadataEquals {
            key: name.to_string(),
            value: FilterValue::from_json(key, value)?,
        });
    }

    if LEGACY_METADATA_KEYS.contains(&key) {
        return Ok(FilterExpr::MetadataEquals {
            key: key.to_string(),
            value: FilterValue::from_json(key, value)?,
        });
    }

    if let Some(target) = PatternTarget::from_key(key) {
        let raw = match value {
            Value::String(s) => s,
            _ => {
                return Err(RetrieverError::validation(format!(
                    "Pattern filter '{key}' must be a string"
                )));
            }
        };
        let pattern = like_pattern(raw);
        if pattern.chars().all(|c| c == '%' || c == '_') {
            return Err(RetrieverError::validation(format!(
                "Pattern filter '{key}' must contain at least one literal character"
            )));
        }
        return Ok(FilterExpr::PatternMatch { target, pattern });
    }

    match ChunkColumn::from_key(key) {
        Some(column) => Ok(FilterExpr::Equals {
            column,
            value: FilterValue::from_json(key, value)?,
        }),
        None => Err(RetrieverError::validation(format!(
            "Unknown filter key '{key}'"
        ))),
    }
}

/// Replace path separators and control whitespace with `/` and collapse runs.
pub fn normalize_separators(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = match c {
            '\\' | '\t' | '\n' => '/',
            other => other,
        };
        if c == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(c);
    }
    normalized
}

/// Turn a user pattern into `LIKE` syntax.
///
/// `*` becomes `%` and `?` becomes `_`. A pattern without any wildcard
/// afterwards is treated as a substring search.
pub fn like_pattern(raw: &str) -> String {
    let translated: String = normalize_separators(raw.trim())
        .chars()
        .map(|c| match c {
            '*' => '%',
            '?' => '_',
            other => other,
        })
        .collect();
    if translated.contains('%') || translated.contains('_') {
        translated
    } else {
        format!("%{translated}%")
    }
}
