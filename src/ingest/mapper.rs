use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::ingest::error::{LoadError, Result};
use crate::ingest::reader::Row;

/// Secondary delimiter used by [`ValueDecoding::MultiValue`] unless overridden.
pub const DEFAULT_MULTI_VALUE_SEPARATOR: char = ',';

/// Ordered, duplicate-free parameter names, one per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeySchema(Vec<String>);

impl KeySchema {
    /// Builds a schema from ordered keys. Keys must be non-empty and unique.
    pub fn new<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(LoadError::argument("key schema must name at least one key"));
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if key.is_empty() {
                return Err(LoadError::argument("key schema contains an empty key"));
            }
            if !seen.insert(key.as_str()) {
                return Err(LoadError::argument(format!("duplicate key '{key}'")));
            }
        }
        Ok(Self(keys))
    }

    /// Parses a comma separated key list such as `"name,date"`.
    pub fn parse_key_list(raw: &str) -> Result<Self> {
        Self::new(raw.split(',').map(str::trim))
    }

    /// Uses the header row's fields as keys.
    pub fn from_header(header: &Row) -> Result<Self> {
        Self::new(header.fields().iter().map(|field| field.trim()))
    }

    /// Keys in positional order.
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a constructed schema.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How raw fields become parameter values. Fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ValueDecoding {
    /// Value is the raw field.
    #[default]
    Plain,
    /// Value is the field split on `separator`; an empty field is an empty list.
    MultiValue {
        /// Secondary delimiter.
        #[serde(default = "default_separator")]
        separator: char,
    },
}

impl ValueDecoding {
    /// Multi-value decoding with the default comma separator.
    pub fn multi_value() -> Self {
        ValueDecoding::MultiValue {
            separator: DEFAULT_MULTI_VALUE_SEPARATOR,
        }
    }

    fn decode(&self, field: &str) -> Value {
        match self {
            ValueDecoding::Plain => Value::String(field.to_owned()),
            ValueDecoding::MultiValue { .. } if field.is_empty() => Value::Array(Vec::new()),
            ValueDecoding::MultiValue { separator } => Value::Array(
                field
                    .split(*separator)
                    .map(|piece| Value::String(piece.to_owned()))
                    .collect(),
            ),
        }
    }
}

fn default_separator() -> char {
    DEFAULT_MULTI_VALUE_SEPARATOR
}

/// Named values for one row; its keys are exactly the key schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet(Map<String, Value>);

impl ParameterSet {
    /// Value bound to `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True only for an empty schema, which [`KeySchema`] forbids.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the bound keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// JSON object form.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Maps `row` onto `schema`. Fails without a partial mapping on arity mismatch.
///
/// `row_offset` only labels the error.
pub fn map_row(
    row: &Row,
    schema: &KeySchema,
    decoding: ValueDecoding,
    row_offset: Option<u64>,
) -> Result<ParameterSet> {
    if row.len() != schema.len() {
        trace!(
            row = ?row_offset,
            expected = schema.len(),
            found = row.len(),
            "ingest.mapper.arity_mismatch"
        );
        return Err(LoadError::SchemaMismatch {
            row: row_offset,
            expected: schema.len(),
            found: row.len(),
        });
    }
    let mut values = Map::with_capacity(schema.len());
    for (key, field) in schema.keys().iter().zip(row.fields()) {
        values.insert(key.clone(), decoding.decode(field));
    }
    Ok(ParameterSet(values))
}
