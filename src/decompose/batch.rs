//! Driving many records through the engine
//!
//! [`BatchDriver::run`] feeds records one by one into a single sink.
//! [`BatchDriver::run_parallel`] splits the records over a rayon pool; each
//! worker gets its own sink from a factory and the catalog is shared
//! read-only. Both check the [`CancelToken`], the record limit and the
//! failure tolerance between records, never inside one.

use crate::decompose::engine::Decomposer;
use crate::decompose::outcome::{RecordOutcome, RecordStatus, TableCounts};
use crate::diagnostic::DiagnosticKind;
use crate::report::TruncationReport;
use crate::sink::RowSink;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Failure messages kept in a summary
const MAX_FAILURE_SAMPLES: usize = 20;

/// Cooperative cancellation flag, checked between records
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregated counters for a batch run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Records handed to the engine
    pub records: usize,
    /// Records whose root row was written
    pub root_rows: usize,
    pub skipped_records: usize,
    /// Records with at least one failed table instance
    pub failed_records: usize,
    pub tables: BTreeMap<String, TableCounts>,
    /// Diagnostic counts by kind
    pub diagnostics: BTreeMap<String, usize>,
    pub truncations: TruncationReport,
    pub failure_samples: Vec<String>,
    /// Stopped early through the cancel token
    pub cancelled: bool,
    /// Stopped early because the failure tolerance was exceeded
    pub stopped_on_failures: bool,
}

impl BatchSummary {
    /// Fold one record outcome into the summary
    pub fn record(&mut self, outcome: &RecordOutcome) {
        self.records += 1;
        match &outcome.status {
            RecordStatus::Inserted(_) => self.root_rows += 1,
            RecordStatus::Skipped => self.skipped_records += 1,
            RecordStatus::PartiallyFailed { root_key } => {
                self.failed_records += 1;
                if root_key.is_some() {
                    self.root_rows += 1;
                }
            }
        }
        for (table, counts) in &outcome.tables {
            self.tables.entry(table.clone()).or_default().merge(counts);
        }
        for diagnostic in &outcome.diagnostics {
            *self.diagnostics.entry(diagnostic.label().to_string()).or_default() += 1;
            if let DiagnosticKind::OverLength { .. } = diagnostic.kind {
                self.truncations.record(diagnostic);
            }
        }
        for failure in &outcome.failures {
            if self.failure_samples.len() < MAX_FAILURE_SAMPLES {
                self.failure_samples.push(failure.to_string());
            }
        }
    }

    /// Combine the summaries of two workers
    pub fn merge(&mut self, other: BatchSummary) {
        self.records += other.records;
        self.root_rows += other.root_rows;
        self.skipped_records += other.skipped_records;
        self.failed_records += other.failed_records;
        for (table, counts) in &other.tables {
            self.tables.entry(table.clone()).or_default().merge(counts);
        }
        for (label, count) in other.diagnostics {
            *self.diagnostics.entry(label).or_default() += count;
        }
        self.truncations.merge(other.truncations);
        let room = MAX_FAILURE_SAMPLES.saturating_sub(self.failure_samples.len());
        self.failure_samples.extend(other.failure_samples.into_iter().take(room));
        self.cancelled |= other.cancelled;
        self.stopped_on_failures |= other.stopped_on_failures;
    }
}

/// Counters shared by all workers of one run
#[derive(Debug, Default)]
struct RunState {
    started: AtomicUsize,
    failed: AtomicUsize,
    stop: AtomicBool,
}

/// Runs records through a [`Decomposer`] with progress logging, limits and
/// cancellation
#[derive(Debug, Clone)]
pub struct BatchDriver<'c> {
    decomposer: Decomposer<'c>,
    progress_interval: usize,
    max_records: Option<usize>,
    failure_tolerance: Option<usize>,
    cancel: CancelToken,
}

impl<'c> BatchDriver<'c> {
    pub fn new(decomposer: Decomposer<'c>) -> Self {
        BatchDriver {
            decomposer,
            progress_interval: 100,
            max_records: None,
            failure_tolerance: None,
            cancel: CancelToken::default(),
        }
    }

    /// Log progress every `interval` records; 0 disables it
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_max_records(mut self, max_records: Option<usize>) -> Self {
        self.max_records = max_records;
        self
    }

    /// Stop once more than `tolerance` records have failed
    pub fn with_failure_tolerance(mut self, tolerance: Option<usize>) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process records in order into one sink, then flush it
    pub fn run<I, V, S>(&self, records: I, sink: &mut S) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = V>,
        V: Borrow<Value>,
        S: RowSink + ?Sized,
    {
        let state = RunState::default();
        let summary = self.drive(records, sink, &state)?;
        self.log_done(&summary);
        Ok(summary)
    }

    /// Process records on `jobs` rayon workers, each writing into the sink
    /// `make_sink(worker_index)` returns.
    ///
    /// Records are split into contiguous chunks, so row order is preserved
    /// within a worker but not across workers.
    pub fn run_parallel<S, F>(&self, records: &[Value], jobs: usize, make_sink: F) -> Result<BatchSummary>
    where
        S: RowSink,
        F: Fn(usize) -> Result<S> + Sync,
    {
        use rayon::prelude::*;

        let jobs = jobs.max(1);
        let chunk_size = records.len().div_ceil(jobs).max(1);
        let state = RunState::default();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("Failed to build worker pool")?;

        let summaries = pool.install(|| {
            records
                .par_chunks(chunk_size)
                .enumerate()
                .map(|(worker, chunk)| {
                    let mut sink = make_sink(worker).with_context(|| format!("Failed to create sink for worker {}", worker))?;
                    self.drive(chunk, &mut sink, &state)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut summary = BatchSummary::default();
        for worker_summary in summaries {
            summary.merge(worker_summary);
        }
        self.log_done(&summary);
        Ok(summary)
    }

    fn drive<I, V, S>(&self, records: I, sink: &mut S, state: &RunState) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = V>,
        V: Borrow<Value>,
        S: RowSink + ?Sized,
    {
        let mut summary = BatchSummary::default();

        for record in records {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if state.stop.load(Ordering::SeqCst) {
                summary.stopped_on_failures = true;
                break;
            }
            let max = self.max_records;
            let claimed = state
                .started
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max {
                    Some(max) if n >= max => None,
                    _ => Some(n + 1),
                });
            let Ok(previous) = claimed else {
                break;
            };

            sink.begin_record().context("Failed to start record")?;
            let outcome = self.decomposer.decompose(record.borrow(), sink);
            sink.finish_record().context("Failed to finish record")?;
            summary.record(&outcome);

            if outcome.is_failed() {
                let failed = state.failed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(tolerance) = self.failure_tolerance {
                    if failed > tolerance {
                        warn!(failed, tolerance, "failure tolerance exceeded, stopping");
                        state.stop.store(true, Ordering::SeqCst);
                        summary.stopped_on_failures = true;
                        break;
                    }
                }
            }

            let processed = previous + 1;
            if self.progress_interval > 0 && processed % self.progress_interval == 0 {
                info!(
                    records = processed,
                    failed = state.failed.load(Ordering::Relaxed),
                    "processed records"
                );
            }
        }

        sink.flush().context("Failed to flush sink")?;
        Ok(summary)
    }

    fn log_done(&self, summary: &BatchSummary) {
        if summary.cancelled {
            warn!(records = summary.records, "batch cancelled");
        }
        info!(
            records = summary.records,
            root_rows = summary.root_rows,
            skipped = summary.skipped_records,
            failed = summary.failed_records,
            "batch finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogDefs, FieldDef, TableDef, TableKind};
    use crate::coerce::{Coercer, TruncationPolicy};
    use crate::sink::MemorySink;
    use serde_json::json;
    use std::sync::Mutex;

    fn catalog() -> Catalog {
        Catalog::from_defs(CatalogDefs {
            tables: vec![
                TableDef::root("users").with_array_children(),
                TableDef::child("users_tags", TableKind::Enum, "users", "tags", "users_id"),
            ],
            fields: vec![
                FieldDef::new("users", "name", "name", "VARCHAR(5)"),
                FieldDef::array("users", "tags", "tags"),
                FieldDef::new("users_tags", "tag", "tags[]", "TEXT"),
            ],
            relationships: vec![],
        })
        .unwrap()
    }

    fn records() -> Vec<Value> {
        vec![
            json!({"name": "alice", "tags": ["a", "b"]}),
            json!({}),
            json!({"name": "bob"}),
            json!({"name": "christopher"}),
            json!({"name": "dan", "tags": ["c"]}),
        ]
    }

    #[test]
    fn test_sequential_summary() {
        let catalog = catalog();
        let driver = BatchDriver::new(Decomposer::new(&catalog, Coercer::new(TruncationPolicy::Both)));
        let mut sink = MemorySink::new();
        let summary = driver.run(records(), &mut sink).unwrap();

        assert_eq!(summary.records, 5);
        assert_eq!(summary.root_rows, 4);
        assert_eq!(summary.skipped_records, 1);
        assert_eq!(summary.failed_records, 0);
        assert_eq!(summary.tables["users"].inserted, 4);
        assert_eq!(summary.tables["users_tags"].inserted, 3);
        assert_eq!(summary.diagnostics["truncated"], 1);
        assert_eq!(sink.records(), 5);

        let entry = summary.truncations.get("users", "name").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.max_original_length, 11);
    }

    #[test]
    fn test_max_records() {
        let catalog = catalog();
        let driver = BatchDriver::new(Decomposer::new(&catalog, Coercer::default())).with_max_records(Some(2));
        let mut sink = MemorySink::new();
        let summary = driver.run(records(), &mut sink).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(sink.records(), 2);
    }

    #[test]
    fn test_failure_tolerance_stops_batch() {
        let catalog = catalog();
        let driver = BatchDriver::new(Decomposer::new(&catalog, Coercer::default())).with_failure_tolerance(Some(1));
        let mut sink = MemorySink::new().reject_table("users");
        let summary = driver.run(records(), &mut sink).unwrap();

        // the empty record is skipped before the second failure
        assert_eq!(summary.records, 3);
        assert_eq!(summary.failed_records, 2);
        assert!(summary.stopped_on_failures);
        assert!(!summary.failure_samples.is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let catalog = catalog();
        let cancel = CancelToken::new();
        let driver = BatchDriver::new(Decomposer::new(&catalog, Coercer::default())).with_cancel_token(cancel.clone());
        cancel.cancel();

        let mut sink = MemorySink::new();
        let summary = driver.run(records(), &mut sink).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.records, 0);
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential_counts() {
        let catalog = catalog();
        let driver = BatchDriver::new(Decomposer::new(&catalog, Coercer::default()));
        let workers = Mutex::new(Vec::new());

        let summary = driver
            .run_parallel(&records(), 3, |worker| {
                workers.lock().unwrap().push(worker);
                Ok(MemorySink::new())
            })
            .unwrap();

        assert_eq!(summary.records, 5);
        assert_eq!(summary.root_rows, 4);
        assert_eq!(summary.tables["users_tags"].inserted, 3);
        let mut seen = workers.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
