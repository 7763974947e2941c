//! Raw catalog definitions, as read from CSV or JSON
//!
//! These mirror the three tabular definitions produced by the catalog
//! generator (tables, fields, relationships). They are plain data; the
//! [`Catalog`](super::Catalog) compiles and validates them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Matches SQL-style type declarations: `VARCHAR(255)`, `numeric(10, 2)`,
/// `timestamp without time zone`, `text[]`.
static TYPE_DECL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*\d+\s*)?\))?\s*(?:\[\])?\s*$")
        .unwrap()
});

/// Role of a table in the decomposed forest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// One row per record
    #[serde(alias = "main")]
    Root,
    /// A nested object
    Object,
    /// A list of objects, one row per element
    Array,
    /// A list of scalars, one row per element
    Enum,
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "root" | "main" => Ok(TableKind::Root),
            "object" => Ok(TableKind::Object),
            "array" => Ok(TableKind::Array),
            "enum" => Ok(TableKind::Enum),
            other => Err(format!("unknown table kind `{}`", other)),
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TableKind::Root => "root",
            TableKind::Object => "object",
            TableKind::Array => "array",
            TableKind::Enum => "enum",
        })
    }
}

/// Column type a field is coerced into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Json,
}

impl TargetType {
    /// Parse a declared type, returning the type and any length carried in
    /// the declaration (`VARCHAR(50)` gives `Some(50)`).
    pub fn parse_decl(decl: &str) -> Option<(TargetType, Option<usize>)> {
        let caps = TYPE_DECL_REGEX.captures(decl)?;
        let base = caps.get(1)?.as_str().to_ascii_lowercase();
        let length = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());

        // First match wins
        let target = if base.contains("json") {
            TargetType::Json
        } else if base.starts_with("bool") {
            TargetType::Boolean
        } else if base.contains("date") || base.contains("timestamp") {
            TargetType::Date
        } else if base.contains("char") || base.contains("text") || base == "string" || base == "uuid" {
            TargetType::Text
        } else if base.contains("int") || base.contains("serial") {
            TargetType::Integer
        } else if ["decimal", "numeric", "float", "double", "real", "number"]
            .iter()
            .any(|t| base.contains(t))
        {
            TargetType::Decimal
        } else {
            return None;
        };

        let length = if target == TargetType::Text { length } else { None };
        Some((target, length))
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetType::Text => "text",
            TargetType::Integer => "integer",
            TargetType::Decimal => "decimal",
            TargetType::Boolean => "boolean",
            TargetType::Date => "date",
            TargetType::Json => "json",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A table declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub kind: TableKind,
    #[serde(default)]
    pub parent_table: Option<String>,
    /// Path the table's instances come from; empty for the root
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub foreign_key_field: Option<String>,
    #[serde(default)]
    pub has_array_children: bool,
}

impl TableDef {
    pub fn root(name: impl Into<String>) -> Self {
        TableDef {
            name: name.into(),
            kind: TableKind::Root,
            parent_table: None,
            source_path: String::new(),
            foreign_key_field: None,
            has_array_children: false,
        }
    }

    pub fn child(
        name: impl Into<String>,
        kind: TableKind,
        parent: impl Into<String>,
        source_path: impl Into<String>,
        foreign_key_field: impl Into<String>,
    ) -> Self {
        TableDef {
            name: name.into(),
            kind,
            parent_table: Some(parent.into()),
            source_path: source_path.into(),
            foreign_key_field: Some(foreign_key_field.into()),
            has_array_children: false,
        }
    }

    pub fn with_array_children(mut self) -> Self {
        self.has_array_children = true;
        self
    }
}

/// A field (column or array locator) declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Owning table
    pub table: String,
    pub name: String,
    /// Path rooted at the record
    pub source_path: String,
    /// The path yields a list feeding a child table, not a column value
    #[serde(default)]
    pub is_array: bool,
    /// Declared type, e.g. `VARCHAR(255)`, `INTEGER`, `JSONB`
    #[serde(default)]
    pub target_type: String,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl FieldDef {
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        source_path: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        FieldDef {
            table: table.into(),
            name: name.into(),
            source_path: source_path.into(),
            is_array: false,
            target_type: target_type.into(),
            max_length: None,
        }
    }

    /// A field locating the source list of a child table
    pub fn array(table: impl Into<String>, name: impl Into<String>, source_path: impl Into<String>) -> Self {
        FieldDef {
            table: table.into(),
            name: name.into(),
            source_path: source_path.into(),
            is_array: true,
            target_type: String::from("array"),
            max_length: None,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// A parent/child relationship declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub child_table: String,
    pub parent_table: String,
    pub foreign_key_field: String,
    /// Informational, e.g. "one-to-many"
    #[serde(default)]
    pub relationship_type: Option<String>,
}

impl RelationshipDef {
    pub fn new(
        child_table: impl Into<String>,
        parent_table: impl Into<String>,
        foreign_key_field: impl Into<String>,
    ) -> Self {
        RelationshipDef {
            child_table: child_table.into(),
            parent_table: parent_table.into(),
            foreign_key_field: foreign_key_field.into(),
            relationship_type: None,
        }
    }
}

/// The full set of definitions a catalog is compiled from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDefs {
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_declarations() {
        assert_eq!(TargetType::parse_decl("VARCHAR(255)"), Some((TargetType::Text, Some(255))));
        assert_eq!(TargetType::parse_decl("text"), Some((TargetType::Text, None)));
        assert_eq!(
            TargetType::parse_decl("character varying(40)"),
            Some((TargetType::Text, Some(40)))
        );
        assert_eq!(TargetType::parse_decl("BIGINT"), Some((TargetType::Integer, None)));
        assert_eq!(TargetType::parse_decl("numeric(10, 2)"), Some((TargetType::Decimal, None)));
        assert_eq!(TargetType::parse_decl("double precision"), Some((TargetType::Decimal, None)));
        assert_eq!(TargetType::parse_decl("Boolean"), Some((TargetType::Boolean, None)));
        assert_eq!(
            TargetType::parse_decl("timestamp without time zone"),
            Some((TargetType::Date, None))
        );
        assert_eq!(TargetType::parse_decl("JSONB"), Some((TargetType::Json, None)));
        assert_eq!(TargetType::parse_decl("geometry"), None);
        assert_eq!(TargetType::parse_decl(""), None);
    }

    #[test]
    fn test_table_kind_aliases() {
        assert_eq!("main".parse::<TableKind>().unwrap(), TableKind::Root);
        assert_eq!(" Enum ".parse::<TableKind>().unwrap(), TableKind::Enum);
        assert!("matrix".parse::<TableKind>().is_err());

        let kind: TableKind = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(kind, TableKind::Root);
    }
}
