//! # Ingot - schema-driven JSON to relational decomposition
//!
//! Ingot splits nested JSON records into rows of a relational schema that is
//! described up front by a catalog of tables, fields and relationships.
//! Every row is handed to a [`RowSink`] parents first, and child rows carry
//! the key their parent was given.
//!
//! ## Modules
//!
//! - **path**: dotted/bracketed path expressions over JSON values
//! - **coerce**: conversion of raw JSON values into typed column values
//! - **catalog**: loading and validating the table/field/relationship catalog
//! - **decompose**: the per-record engine and the batch driver
//! - **sink**: row destinations (memory, JSON Lines, SQLite)
//! - **source**: reading documents and splitting them into records
//!
//! ## Quick Start
//!
//! ```rust
//! use ingot::catalog::{Catalog, CatalogDefs, FieldDef, TableDef, TableKind};
//! use ingot::{Coercer, Decomposer, MemorySink};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let catalog = Catalog::from_defs(CatalogDefs {
//!     tables: vec![
//!         TableDef::root("users").with_array_children(),
//!         TableDef::child("users_tags", TableKind::Enum, "users", "tags", "users_id"),
//!     ],
//!     fields: vec![
//!         FieldDef::new("users", "name", "name", "TEXT"),
//!         FieldDef::array("users", "tags", "tags"),
//!         FieldDef::new("users_tags", "tag", "tags[]", "TEXT"),
//!     ],
//!     relationships: vec![],
//! })?;
//!
//! let mut sink = MemorySink::new();
//! let decomposer = Decomposer::new(&catalog, Coercer::default());
//! decomposer.decompose(&json!({"name": "Alice", "tags": ["admin", "ops"]}), &mut sink);
//!
//! assert_eq!(sink.count("users"), 1);
//! assert_eq!(sink.count("users_tags"), 2);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::Read;

pub mod catalog;
pub mod coerce;
pub mod config;
pub mod decompose;
pub mod diagnostic;
pub mod error;
pub mod path;
pub mod report;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types for convenience
pub use catalog::Catalog;
pub use coerce::{Coercer, TruncationPolicy};
pub use config::ImportConfig;
pub use decompose::{BatchDriver, BatchSummary, CancelToken, Decomposer, RecordOutcome, RecordStatus};
pub use error::{CatalogError, CoercionError, SinkError};
pub use path::PathExpr;
pub use sink::{JsonlDirSink, JsonlStreamSink, MemorySink, RowSink, SqliteSink};
pub use types::{Datum, GeneratedKey, Row};

/// Main entry point: decompose every record of a JSON or NDJSON stream into
/// `sink`
pub fn import_json<R: Read, S: RowSink + ?Sized>(
    mut reader: R,
    catalog: &Catalog,
    sink: &mut S,
    config: &ImportConfig,
) -> Result<BatchSummary> {
    let mut content = Vec::new();
    reader.read_to_end(&mut content).context("Failed to read input")?;

    let records = source::parse_documents(&content)?
        .into_iter()
        .flat_map(source::split_records);

    config.batch_driver(catalog).run(records, sink)
}
