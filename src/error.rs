//! Error types shared across the crate
//!
//! Catalog errors are fatal and raised before any record is read. Coercion
//! and sink errors are per table instance: the engine records them in the
//! record outcome and keeps going.

use crate::path::PathError;
use thiserror::Error;

/// Inconsistencies found while compiling catalog definitions
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("table `{0}` is defined more than once")]
    DuplicateTable(String),

    #[error("no root table defined")]
    NoRootTable,

    #[error("more than one root table defined: {0:?}")]
    MultipleRootTables(Vec<String>),

    #[error("root table `{0}` must not declare a parent")]
    RootHasParent(String),

    #[error("table `{0}` is not a root table but declares no parent")]
    MissingParent(String),

    #[error("table `{table}` references unknown parent `{parent}`")]
    DanglingParent { table: String, parent: String },

    #[error("parent chain of table `{0}` contains a cycle")]
    ParentCycle(String),

    #[error("table `{0}` has a parent but no foreign key field")]
    MissingForeignKey(String),

    #[error("`{0}` has no source path")]
    MissingSourcePath(String),

    #[error("tables `{first}` and `{second}` share source path `{path}`")]
    DuplicateSourcePath {
        path: String,
        first: String,
        second: String,
    },

    #[error("invalid path on `{owner}`: {source}")]
    MalformedPath {
        owner: String,
        #[source]
        source: PathError,
    },

    #[error("field `{field}` belongs to unknown table `{table}`")]
    UnknownFieldTable { table: String, field: String },

    #[error("field `{field}` is defined more than once on table `{table}`")]
    DuplicateField { table: String, field: String },

    #[error("field `{table}.{field}` declares unknown type `{declared}`")]
    UnknownTargetType {
        table: String,
        field: String,
        declared: String,
    },

    #[error("relationship references unknown table `{0}`")]
    UnknownRelationshipTable(String),

    #[error("relationship for `{child}` disagrees with its table definition: {detail}")]
    RelationshipMismatch { child: String, detail: String },

    #[error("array field `{table}.{field}` maps to table `{child}`, whose parent is `{parent}`")]
    ParentMismatch {
        table: String,
        field: String,
        child: String,
        parent: String,
    },

    #[error("enum table `{0}` has no value field")]
    EnumWithoutValueField(String),
}

/// Hard coercion failure; only raised under the `error` truncation policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("{table}.{field}: value of length {actual} exceeds maximum length {max}")]
    TooLong {
        table: String,
        field: String,
        max: usize,
        actual: usize,
    },
}

/// Failure reported by a row sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("insert into `{table}` rejected: {reason}")]
    Rejected { table: String, reason: String },
}
