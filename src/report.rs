//! Human-readable batch reports

use crate::decompose::BatchSummary;
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Example values kept per truncated field
const MAX_EXAMPLES: usize = 3;

/// Over-length incidents of one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TruncationEntry {
    pub count: usize,
    pub max_original_length: usize,
    pub max_length: usize,
    /// Previews of the first offending values
    pub examples: Vec<String>,
}

/// Over-length incidents grouped by table, then field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TruncationReport {
    tables: BTreeMap<String, BTreeMap<String, TruncationEntry>>,
}

impl TruncationReport {
    /// Add an over-length diagnostic; other kinds are ignored
    pub fn record(&mut self, diagnostic: &Diagnostic) {
        let DiagnosticKind::OverLength {
            original_length,
            max_length,
            preview,
            ..
        } = &diagnostic.kind
        else {
            return;
        };
        let field = diagnostic.field.clone().unwrap_or_default();
        let entry = self
            .tables
            .entry(diagnostic.table.clone())
            .or_default()
            .entry(field)
            .or_default();
        entry.count += 1;
        entry.max_original_length = entry.max_original_length.max(*original_length);
        entry.max_length = *max_length;
        if entry.examples.len() < MAX_EXAMPLES {
            entry.examples.push(preview.clone());
        }
    }

    pub fn merge(&mut self, other: TruncationReport) {
        for (table, fields) in other.tables {
            let target = self.tables.entry(table).or_default();
            for (field, entry) in fields {
                let mine = target.entry(field).or_default();
                mine.count += entry.count;
                mine.max_original_length = mine.max_original_length.max(entry.max_original_length);
                mine.max_length = entry.max_length;
                let room = MAX_EXAMPLES.saturating_sub(mine.examples.len());
                mine.examples.extend(entry.examples.into_iter().take(room));
            }
        }
    }

    pub fn get(&self, table: &str, field: &str) -> Option<&TruncationEntry> {
        self.tables.get(table)?.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// `(table, field, entry)` in table then field order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &TruncationEntry)> {
        self.tables.iter().flat_map(|(table, fields)| {
            fields
                .iter()
                .map(move |(field, entry)| (table.as_str(), field.as_str(), entry))
        })
    }
}

impl fmt::Display for TruncationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No over-length values.");
        }
        writeln!(f, "Over-length values:")?;
        for (table, field, entry) in self.entries() {
            writeln!(
                f,
                "  {}.{}: {} value(s), longest {} (max {})",
                table, field, entry.count, entry.max_original_length, entry.max_length
            )?;
            for example in &entry.examples {
                writeln!(f, "    e.g. {:?}", example)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records attempted: {}", self.records)?;
        writeln!(f, "Root rows inserted: {}", self.root_rows)?;
        writeln!(f, "Records skipped:   {}", self.skipped_records)?;
        writeln!(f, "Records failed:    {}", self.failed_records)?;
        if self.cancelled {
            writeln!(f, "Run was cancelled before all records were processed.")?;
        }
        if self.stopped_on_failures {
            writeln!(f, "Run stopped after exceeding the failure tolerance.")?;
        }

        if !self.tables.is_empty() {
            let width = self.tables.keys().map(String::len).max().unwrap_or(0);
            writeln!(f)?;
            writeln!(f, "{:width$}  {:>10} {:>10} {:>10}", "table", "inserted", "suppressed", "failed")?;
            for (table, counts) in &self.tables {
                writeln!(
                    f,
                    "{:width$}  {:>10} {:>10} {:>10}",
                    table, counts.inserted, counts.suppressed, counts.failed
                )?;
            }
        }

        if !self.diagnostics.is_empty() {
            writeln!(f)?;
            writeln!(f, "Diagnostics:")?;
            for (label, count) in &self.diagnostics {
                writeln!(f, "  {}: {}", label, count)?;
            }
        }

        if !self.failure_samples.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures (first {}):", self.failure_samples.len())?;
            for failure in &self.failure_samples {
                writeln!(f, "  {}", failure)?;
            }
        }

        writeln!(f)?;
        write!(f, "{}", self.truncations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over_length(table: &str, field: &str, original_length: usize, preview: &str) -> Diagnostic {
        Diagnostic::new(
            table,
            Some(field),
            DiagnosticKind::OverLength {
                original_length,
                max_length: 5,
                truncated: true,
                preview: preview.to_string(),
            },
        )
    }

    #[test]
    fn test_truncation_report_keeps_three_examples() {
        let mut report = TruncationReport::default();
        for (len, text) in [(7, "a"), (12, "b"), (9, "c"), (8, "d")] {
            report.record(&over_length("event", "name", len, text));
        }
        report.record(&Diagnostic::new("event", None, DiagnosticKind::NonObjectElement { index: 0 }));

        let entry = report.get("event", "name").unwrap();
        assert_eq!(entry.count, 4);
        assert_eq!(entry.max_original_length, 12);
        assert_eq!(entry.examples, vec!["a", "b", "c"]);
        assert_eq!(report.entries().count(), 1);
    }

    #[test]
    fn test_merge() {
        let mut left = TruncationReport::default();
        left.record(&over_length("event", "name", 7, "a"));
        let mut right = TruncationReport::default();
        right.record(&over_length("event", "name", 20, "b"));
        right.record(&over_length("event", "code", 6, "c"));

        left.merge(right);
        assert_eq!(left.get("event", "name").unwrap().count, 2);
        assert_eq!(left.get("event", "name").unwrap().max_original_length, 20);
        assert!(left.get("event", "code").is_some());
    }

    #[test]
    fn test_summary_display() {
        let mut summary = BatchSummary::default();
        summary.records = 3;
        summary.root_rows = 2;
        summary.truncations.record(&over_length("event", "name", 7, "abcdefg"));

        let text = summary.to_string();
        assert!(text.contains("Records attempted: 3"));
        assert!(text.contains("event.name: 1 value(s), longest 7 (max 5)"));
    }
}
