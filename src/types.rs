use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier handed back by a row sink after a successful insert.
///
/// Only meaningful while the record that produced it is being decomposed:
/// it is passed down as the foreign key of child rows and then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratedKey::Int(id) => write!(f, "{}", id),
            GeneratedKey::Text(id) => f.write_str(id),
        }
    }
}

/// A coerced column value, ready for a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Datum {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// ISO `YYYY-MM-DD`, or the raw text when it could not be parsed
    Date(String),
    /// Serialized JSON document
    Json(String),
    /// A parent's generated key stored in a foreign key column
    Key(GeneratedKey),
}

impl Datum {
    /// The textual payload for text-like variants
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Datum::Text(s) | Datum::Date(s) | Datum::Json(s) => Some(s),
            _ => None,
        }
    }
}

impl From<GeneratedKey> for Datum {
    fn from(key: GeneratedKey) -> Self {
        Datum::Key(key)
    }
}

/// One row: column name to value, in insertion order
pub type Row = IndexMap<String, Datum>;
