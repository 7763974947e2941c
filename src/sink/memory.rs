use crate::error::SinkError;
use crate::sink::RowSink;
use crate::types::{GeneratedKey, Row};
use std::collections::HashSet;

/// A row as kept by [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub table: String,
    /// `None` for rows written through `bulk_insert`
    pub key: Option<GeneratedKey>,
    pub row: Row,
}

/// Keeps every row in memory, in insertion order.
///
/// Useful for dry runs and tests. Tables can be marked as rejecting so
/// failure handling can be exercised without a database.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<StoredRow>,
    next_id: i64,
    rejected: HashSet<String>,
    records: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Make every insert into `table` fail
    pub fn reject_table(mut self, table: impl Into<String>) -> Self {
        self.rejected.insert(table.into());
        self
    }

    pub fn rows(&self) -> &[StoredRow] {
        &self.rows
    }

    /// Rows of one table, in insertion order
    pub fn rows_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a StoredRow> + 'a {
        self.rows.iter().filter(move |r| r.table == table)
    }

    pub fn count(&self, table: &str) -> usize {
        self.rows_for(table).count()
    }

    /// Number of records started with `begin_record`
    pub fn records(&self) -> usize {
        self.records
    }

    fn check(&self, table: &str) -> Result<(), SinkError> {
        if self.rejected.contains(table) {
            return Err(SinkError::Rejected {
                table: table.to_string(),
                reason: "table is configured to reject inserts".to_string(),
            });
        }
        Ok(())
    }
}

impl RowSink for MemorySink {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        self.check(table)?;
        self.next_id += 1;
        let key = GeneratedKey::Int(self.next_id);
        self.rows.push(StoredRow {
            table: table.to_string(),
            key: Some(key.clone()),
            row,
        });
        Ok(key)
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        self.check(table)?;
        self.rows.extend(rows.into_iter().map(|row| StoredRow {
            table: table.to_string(),
            key: None,
            row,
        }));
        Ok(())
    }

    fn begin_record(&mut self) -> Result<(), SinkError> {
        self.records += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Datum;

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), Datum::Text(name.to_string()));
        row
    }

    #[test]
    fn test_keys_are_sequential() {
        let mut sink = MemorySink::new();
        assert_eq!(sink.insert("users", row("a")).unwrap(), GeneratedKey::Int(1));
        assert_eq!(sink.insert("posts", row("b")).unwrap(), GeneratedKey::Int(2));
        sink.bulk_insert("tags", vec![row("x"), row("y")]).unwrap();

        assert_eq!(sink.rows().len(), 4);
        assert_eq!(sink.count("tags"), 2);
        assert!(sink.rows_for("tags").all(|r| r.key.is_none()));
    }

    #[test]
    fn test_rejected_table() {
        let mut sink = MemorySink::new().reject_table("posts");
        assert!(sink.insert("posts", row("a")).is_err());
        assert!(sink.bulk_insert("posts", vec![row("a")]).is_err());
        assert!(sink.insert("users", row("a")).is_ok());
        assert_eq!(sink.rows().len(), 1);
    }
}
