use crate::diagnostic::Diagnostic;
use crate::error::CoercionError;
use crate::types::GeneratedKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How a record ended up
#[derive(Debug, Clone, PartialEq)]
pub enum RecordStatus {
    /// Every table instance was either inserted or suppressed
    Inserted(GeneratedKey),
    /// The root row was suppressed; nothing was written
    Skipped,
    /// At least one table instance failed. `root_key` is set when the root
    /// row itself made it.
    PartiallyFailed { root_key: Option<GeneratedKey> },
}

/// Per-table row counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub inserted: usize,
    /// Instances (or enum elements) with no extracted value
    pub suppressed: usize,
    /// Rows lost to a coercion or sink error
    pub failed: usize,
}

impl TableCounts {
    pub fn merge(&mut self, other: &TableCounts) {
        self.inserted += other.inserted;
        self.suppressed += other.suppressed;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    Coercion(CoercionError),
    /// Sink errors are not `Clone`, so only the message is kept
    Sink(String),
}

/// A table instance that could not be written
#[derive(Debug, Clone, PartialEq)]
pub struct TableFailure {
    pub table: String,
    pub cause: FailureCause,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::Coercion(err) => write!(f, "{}: {}", self.table, err),
            FailureCause::Sink(msg) => write!(f, "{}: insert failed: {}", self.table, msg),
        }
    }
}

/// Everything the engine learned about one record
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub status: RecordStatus,
    pub tables: BTreeMap<String, TableCounts>,
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<TableFailure>,
}

impl RecordOutcome {
    pub(crate) fn new() -> Self {
        RecordOutcome {
            status: RecordStatus::Skipped,
            tables: BTreeMap::new(),
            diagnostics: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn counts_mut(&mut self, table: &str) -> &mut TableCounts {
        self.tables.entry(table.to_string()).or_default()
    }

    pub(crate) fn fail(&mut self, table: &str, cause: FailureCause, rows: usize) {
        self.counts_mut(table).failed += rows;
        self.failures.push(TableFailure {
            table: table.to_string(),
            cause,
        });
    }

    pub(crate) fn finish(mut self, root_key: Option<GeneratedKey>) -> Self {
        self.status = match (root_key, self.failures.is_empty()) {
            (Some(key), true) => RecordStatus::Inserted(key),
            (None, true) => RecordStatus::Skipped,
            (root_key, false) => RecordStatus::PartiallyFailed { root_key },
        };
        self
    }

    /// Counters for `table`; all zero if the table was never reached
    pub fn counts(&self, table: &str) -> TableCounts {
        self.tables.get(table).copied().unwrap_or_default()
    }

    pub fn root_key(&self) -> Option<&GeneratedKey> {
        match &self.status {
            RecordStatus::Inserted(key) => Some(key),
            RecordStatus::PartiallyFailed { root_key } => root_key.as_ref(),
            RecordStatus::Skipped => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RecordStatus::PartiallyFailed { .. })
    }
}
