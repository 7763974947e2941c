//! Row sinks - where decomposed rows end up
//!
//! The engine makes exactly one [`RowSink::insert`] call per row, parents
//! before children, and one [`RowSink::bulk_insert`] per enum array. How
//! rows are buffered and committed is up to the sink.

pub mod jsonl;
pub mod memory;
pub mod sqlite;

pub use jsonl::{JsonlDirSink, JsonlStreamSink};
pub use memory::{MemorySink, StoredRow};
pub use sqlite::{CommitMode, SqliteSink};

use crate::error::SinkError;
use crate::types::{GeneratedKey, Row};

/// Destination for decomposed rows
pub trait RowSink {
    /// Insert one row and return its generated key
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError>;

    /// Insert many rows into an enum table; no keys are returned
    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError>;

    /// Called before the first row of a record
    fn begin_record(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called after the last row of a record, whatever its outcome
    fn finish_record(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Make everything written so far durable
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: RowSink + ?Sized> RowSink for &mut S {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        (**self).insert(table, row)
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        (**self).bulk_insert(table, rows)
    }

    fn begin_record(&mut self) -> Result<(), SinkError> {
        (**self).begin_record()
    }

    fn finish_record(&mut self) -> Result<(), SinkError> {
        (**self).finish_record()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        (**self).insert(table, row)
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        (**self).bulk_insert(table, rows)
    }

    fn begin_record(&mut self) -> Result<(), SinkError> {
        (**self).begin_record()
    }

    fn finish_record(&mut self) -> Result<(), SinkError> {
        (**self).finish_record()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}
