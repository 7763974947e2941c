//! Record decomposition
//!
//! [`Decomposer`] walks one record against the catalog and writes its rows
//! through a [`RowSink`](crate::sink::RowSink), returning a
//! [`RecordOutcome`]. [`BatchDriver`] runs many records and folds their
//! outcomes into a [`BatchSummary`].

pub mod batch;
pub mod engine;
pub mod outcome;

pub use batch::{BatchDriver, BatchSummary, CancelToken};
pub use engine::Decomposer;
pub use outcome::{FailureCause, RecordOutcome, RecordStatus, TableCounts, TableFailure};
