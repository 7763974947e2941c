use crate::catalog::{ArrayLink, Catalog, EmbeddedChild, Table, TableKind};
use crate::coerce::{Coercer, Coercion};
use crate::decompose::outcome::{FailureCause, RecordOutcome};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::CoercionError;
use crate::sink::RowSink;
use crate::types::{Datum, GeneratedKey, Row};
use serde_json::Value;
use tracing::{debug, warn};

/// Splits records into rows following a compiled [`Catalog`]
#[derive(Debug, Clone, Copy)]
pub struct Decomposer<'c> {
    catalog: &'c Catalog,
    coercer: Coercer,
    dedupe_enum_values: bool,
}

impl<'c> Decomposer<'c> {
    pub fn new(catalog: &'c Catalog, coercer: Coercer) -> Self {
        Decomposer {
            catalog,
            coercer,
            dedupe_enum_values: false,
        }
    }

    /// Drop repeated values within one enum array
    pub fn with_enum_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe_enum_values = dedupe;
        self
    }

    /// Decompose one record into `sink`.
    ///
    /// Rows are inserted parents first, so every child row carries the key
    /// its parent was given. Failures stay local to the table instance they
    /// hit: siblings and already written ancestors are unaffected, and the
    /// outcome reports what happened instead of returning an error.
    pub fn decompose<S: RowSink + ?Sized>(&self, record: &Value, sink: &mut S) -> RecordOutcome {
        let mut outcome = RecordOutcome::new();
        let root_key = self.visit(self.catalog.root(), record, None, sink, &mut outcome);
        outcome.finish(root_key)
    }

    /// Build, insert and descend into one table instance
    fn visit<S: RowSink + ?Sized>(
        &self,
        table: &Table,
        context: &Value,
        parent_key: Option<&GeneratedKey>,
        sink: &mut S,
        outcome: &mut RecordOutcome,
    ) -> Option<GeneratedKey> {
        let mut row = match self.build_row(table, context, outcome) {
            Ok(row) => row,
            Err(err) => {
                warn!(table = %table.name, error = %err, "dropping row");
                outcome.fail(&table.name, FailureCause::Coercion(err), 1);
                return None;
            }
        };

        if row.is_empty() {
            outcome.counts_mut(&table.name).suppressed += 1;
            return None;
        }

        if let (Some(fk), Some(key)) = (&table.foreign_key, parent_key) {
            row.insert(fk.clone(), Datum::Key(key.clone()));
        }

        let key = match sink.insert(&table.name, row) {
            Ok(key) => key,
            Err(err) => {
                warn!(table = %table.name, error = %err, "insert failed");
                outcome.fail(&table.name, FailureCause::Sink(err.to_string()), 1);
                return None;
            }
        };
        outcome.counts_mut(&table.name).inserted += 1;

        for link in &table.array_links {
            self.visit_array(table, link, context, &key, sink, outcome);
        }
        for embedded in &table.embedded {
            self.visit_embedded(embedded, context, &key, sink, outcome);
        }

        Some(key)
    }

    fn build_row(&self, table: &Table, context: &Value, outcome: &mut RecordOutcome) -> Result<Row, CoercionError> {
        let mut row = Row::with_capacity(table.columns.len() + 1);
        for column in &table.columns {
            let raw = column.path.resolve(context);
            if raw.is_none() {
                debug!(table = %table.name, column = %column.name, path = %column.path, "path not found");
            }
            let Coercion { value, diagnostic } = self.coercer.coerce(raw, column, &table.name)?;
            outcome.diagnostics.extend(diagnostic);
            if let Some(value) = value {
                row.insert(column.name.clone(), value);
            }
        }
        Ok(row)
    }

    fn visit_array<S: RowSink + ?Sized>(
        &self,
        table: &Table,
        link: &ArrayLink,
        context: &Value,
        key: &GeneratedKey,
        sink: &mut S,
        outcome: &mut RecordOutcome,
    ) {
        let value = match link.path.resolve(context) {
            None | Some(Value::Null) => return,
            Some(value) => value,
        };

        let Some(child_id) = link.child else {
            debug!(table = %table.name, path = %link.source, "skipping array without child table");
            outcome.diagnostics.push(Diagnostic::new(
                &table.name,
                Some(&link.field),
                DiagnosticKind::UnmappedArray {
                    path: link.source.clone(),
                },
            ));
            return;
        };

        let Value::Array(items) = value else {
            debug!(table = %table.name, path = %link.source, "array field is not a list");
            outcome.diagnostics.push(Diagnostic::new(
                &table.name,
                Some(&link.field),
                DiagnosticKind::NotAList {
                    path: link.source.clone(),
                },
            ));
            return;
        };

        let child = self.catalog.table(child_id);
        if child.kind == TableKind::Enum {
            self.insert_enum(child, items, key, sink, outcome);
        } else {
            self.visit_elements(child, items, key, sink, outcome);
        }
    }

    fn visit_embedded<S: RowSink + ?Sized>(
        &self,
        embedded: &EmbeddedChild,
        context: &Value,
        key: &GeneratedKey,
        sink: &mut S,
        outcome: &mut RecordOutcome,
    ) {
        let child = self.catalog.table(embedded.table);
        match embedded.path.resolve(context) {
            Some(value @ Value::Object(_)) => {
                self.visit(child, value, Some(key), sink, outcome);
            }
            Some(Value::Array(items)) => self.visit_elements(child, items, key, sink, outcome),
            None | Some(Value::Null) => {}
            Some(_) => {
                debug!(table = %child.name, path = %embedded.path, "embedded value is not an object");
            }
        }
    }

    fn visit_elements<S: RowSink + ?Sized>(
        &self,
        child: &Table,
        items: &[Value],
        key: &GeneratedKey,
        sink: &mut S,
        outcome: &mut RecordOutcome,
    ) {
        for (index, item) in items.iter().enumerate() {
            if item.is_object() {
                self.visit(child, item, Some(key), sink, outcome);
            } else {
                outcome.diagnostics.push(Diagnostic::new(
                    &child.name,
                    None,
                    DiagnosticKind::NonObjectElement { index },
                ));
            }
        }
    }

    /// Write one row per element of an enum array with a single bulk insert
    fn insert_enum<S: RowSink + ?Sized>(
        &self,
        table: &Table,
        items: &[Value],
        key: &GeneratedKey,
        sink: &mut S,
        outcome: &mut RecordOutcome,
    ) {
        // Compiled catalogs always have one for enum tables
        let Some(column) = table.value_column() else {
            return;
        };

        let mut values: Vec<Datum> = Vec::with_capacity(items.len());
        for item in items {
            match self.coercer.coerce(column.path.resolve(item), column, &table.name) {
                Ok(Coercion { value, diagnostic }) => {
                    outcome.diagnostics.extend(diagnostic);
                    match value {
                        Some(value) if self.dedupe_enum_values && values.contains(&value) => {}
                        Some(value) => values.push(value),
                        None => outcome.counts_mut(&table.name).suppressed += 1,
                    }
                }
                Err(err) => {
                    warn!(table = %table.name, error = %err, "dropping enum value");
                    outcome.fail(&table.name, FailureCause::Coercion(err), 1);
                }
            }
        }
        if values.is_empty() {
            return;
        }

        let rows: Vec<Row> = values
            .into_iter()
            .map(|value| {
                let mut row = Row::with_capacity(2);
                if let Some(fk) = &table.foreign_key {
                    row.insert(fk.clone(), Datum::Key(key.clone()));
                }
                row.insert(column.name.clone(), value);
                row
            })
            .collect();
        let count = rows.len();
        match sink.bulk_insert(&table.name, rows) {
            Ok(()) => outcome.counts_mut(&table.name).inserted += count,
            Err(err) => {
                warn!(table = %table.name, rows = count, error = %err, "bulk insert failed");
                outcome.fail(&table.name, FailureCause::Sink(err.to_string()), count);
            }
        }
    }
}
