use crate::catalog::{Catalog, Table, TargetType};
use crate::error::SinkError;
use crate::sink::RowSink;
use crate::types::{Datum, GeneratedKey, Row};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Surrogate key column of every table created by [`SqliteSink::create_schema`]
pub const KEY_COLUMN: &str = "id";

/// How long a connection waits for another writer to release the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// When the sink commits its open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// One transaction per record
    #[default]
    PerRecord,
    /// One transaction until the next flush
    PerBatch,
}

/// Writes rows into a SQLite database. Keys are the rowids SQLite assigns.
pub struct SqliteSink {
    conn: Connection,
    mode: CommitMode,
    in_transaction: bool,
}

impl SqliteSink {
    /// Open (or create) a database file. Several sinks may open the same
    /// file; writers then take turns.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteSink {
            conn,
            mode: CommitMode::default(),
            in_transaction: false,
        }
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create every catalog table that does not exist yet.
    ///
    /// Each table gets an `id INTEGER PRIMARY KEY AUTOINCREMENT` column and,
    /// below the root, an integer foreign key referencing its parent.
    pub fn create_schema(&self, catalog: &Catalog) -> Result<(), SinkError> {
        let mut ddl = String::new();
        for table in catalog.tables() {
            let parent = table.parent.map(|id| catalog.table(id));
            ddl.push_str(&create_table_sql(table, parent)?);
            ddl.push_str(";\n");
        }
        debug!(tables = catalog.len(), "creating sqlite schema");
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// A failed COMMIT leaves the transaction open, so the flag stays set
    fn commit(&mut self) -> Result<(), SinkError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SinkError> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn execute_insert(&self, table: &str, row: &Row) -> Result<(), SinkError> {
        let sql = insert_sql(table, row);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(rusqlite::params_from_iter(row.values()))?;
        Ok(())
    }
}

impl RowSink for SqliteSink {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        self.execute_insert(table, &row)?;
        Ok(GeneratedKey::Int(self.conn.last_insert_rowid()))
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        // All-or-nothing: a savepoint inside an open record transaction,
        // a transaction of its own otherwise
        let nested = self.in_transaction;
        if nested {
            self.conn.execute_batch("SAVEPOINT sp_bulk")?;
        } else {
            self.begin()?;
        }

        if let Err(err) = rows.iter().try_for_each(|row| self.execute_insert(table, row)) {
            if nested {
                self.conn.execute_batch("ROLLBACK TO sp_bulk; RELEASE sp_bulk")?;
            } else {
                self.rollback()?;
            }
            return Err(err);
        }

        if nested {
            self.conn.execute_batch("RELEASE sp_bulk")?;
        } else {
            self.commit()?;
        }
        Ok(())
    }

    fn begin_record(&mut self) -> Result<(), SinkError> {
        self.begin()
    }

    fn finish_record(&mut self) -> Result<(), SinkError> {
        match self.mode {
            CommitMode::PerRecord => self.commit(),
            CommitMode::PerBatch => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.commit()
    }
}

impl ToSql for Datum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Datum::Text(v) | Datum::Date(v) | Datum::Json(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Datum::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Datum::Decimal(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Datum::Boolean(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Datum::Key(GeneratedKey::Int(v)) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Datum::Key(GeneratedKey::Text(v)) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(target: TargetType) -> &'static str {
    match target {
        TargetType::Text | TargetType::Date | TargetType::Json => "TEXT",
        TargetType::Integer | TargetType::Boolean => "INTEGER",
        TargetType::Decimal => "REAL",
    }
}

fn create_table_sql(table: &Table, parent: Option<&Table>) -> Result<String, SinkError> {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(KEY_COLUMN))];
    let fk = table.foreign_key.as_deref();
    if let (Some(fk), Some(parent)) = (fk, parent) {
        columns.push(format!(
            "{} INTEGER REFERENCES {}({})",
            quote_ident(fk),
            quote_ident(&parent.name),
            quote_ident(KEY_COLUMN)
        ));
    }
    for column in &table.columns {
        if column.name == KEY_COLUMN {
            return Err(SinkError::Rejected {
                table: table.name.clone(),
                reason: format!("column `{}` collides with the surrogate key", KEY_COLUMN),
            });
        }
        // The foreign key column is already declared
        if Some(column.name.as_str()) == fk {
            continue;
        }
        columns.push(format!("{} {}", quote_ident(&column.name), sql_type(column.target)));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        columns.join(", ")
    ))
}

fn insert_sql(table: &str, row: &Row) -> String {
    if row.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let names: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
    let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogDefs, FieldDef, TableDef, TableKind};

    fn catalog() -> Catalog {
        Catalog::from_defs(CatalogDefs {
            tables: vec![
                TableDef::root("event").with_array_children(),
                TableDef::child("event_tags", TableKind::Enum, "event", "tags", "event_id"),
            ],
            fields: vec![
                FieldDef::new("event", "name", "name", "VARCHAR(20)"),
                FieldDef::new("event", "score", "score", "DECIMAL"),
                FieldDef::new("event", "active", "active", "BOOLEAN"),
                FieldDef::array("event", "tags", "tags"),
                FieldDef::new("event_tags", "tag", "tags[]", "TEXT"),
            ],
            relationships: vec![],
        })
        .unwrap()
    }

    fn row(pairs: Vec<(&str, Datum)>) -> Row {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_create_table_sql() {
        let catalog = catalog();
        let sql = create_table_sql(catalog.get("event_tags").unwrap(), Some(catalog.root())).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"event_tags\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"event_id\" INTEGER REFERENCES \"event\"(\"id\"), \"tag\" TEXT)"
        );
    }

    #[test]
    fn test_insert_and_bulk_insert() {
        let catalog = catalog();
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.create_schema(&catalog).unwrap();

        sink.begin_record().unwrap();
        let key = sink
            .insert(
                "event",
                row(vec![
                    ("name", Datum::Text("launch".into())),
                    ("score", Datum::Decimal(1.5)),
                    ("active", Datum::Boolean(true)),
                ]),
            )
            .unwrap();
        assert_eq!(key, GeneratedKey::Int(1));
        sink.bulk_insert(
            "event_tags",
            vec![
                row(vec![("event_id", Datum::Key(key.clone())), ("tag", Datum::Text("a".into()))]),
                row(vec![("event_id", Datum::Key(key)), ("tag", Datum::Text("b".into()))]),
            ],
        )
        .unwrap();
        sink.finish_record().unwrap();

        let conn = sink.connection();
        let (name, score, active): (String, f64, i64) = conn
            .query_row("SELECT name, score, active FROM event WHERE id = 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!((name.as_str(), score, active), ("launch", 1.5, 1));
        let tags: i64 = conn
            .query_row("SELECT COUNT(*) FROM event_tags WHERE event_id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tags, 2);
    }

    #[test]
    fn test_failed_bulk_insert_rolls_back() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.connection()
            .execute_batch("CREATE TABLE tags (id INTEGER PRIMARY KEY, tag TEXT NOT NULL)")
            .unwrap();
        let result = sink.bulk_insert(
            "tags",
            vec![
                row(vec![("tag", Datum::Text("a".into()))]),
                row(vec![("missing", Datum::Text("b".into()))]),
            ],
        );
        assert!(result.is_err());
        let count: i64 = sink
            .connection()
            .query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_failed_bulk_insert_inside_record_keeps_parent_only() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.connection()
            .execute_batch(
                "CREATE TABLE event (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
                 CREATE TABLE event_tags (id INTEGER PRIMARY KEY AUTOINCREMENT, event_id INTEGER, tag TEXT CHECK (tag <> 'bad'));",
            )
            .unwrap();

        sink.begin_record().unwrap();
        let key = sink.insert("event", row(vec![("name", Datum::Text("x".into()))])).unwrap();
        let result = sink.bulk_insert(
            "event_tags",
            vec![
                row(vec![("event_id", Datum::Key(key.clone())), ("tag", Datum::Text("ok".into()))]),
                row(vec![("event_id", Datum::Key(key.clone())), ("tag", Datum::Text("bad".into()))]),
            ],
        );
        assert!(result.is_err());
        sink.bulk_insert(
            "event_tags",
            vec![row(vec![("event_id", Datum::Key(key)), ("tag", Datum::Text("later".into()))])],
        )
        .unwrap();
        sink.finish_record().unwrap();

        let conn = sink.connection();
        let events: i64 = conn.query_row("SELECT COUNT(*) FROM event", [], |r| r.get(0)).unwrap();
        assert_eq!(events, 1);
        let tags: Vec<String> = {
            let mut stmt = conn.prepare("SELECT tag FROM event_tags ORDER BY id").unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.collect::<std::result::Result<_, _>>().unwrap()
        };
        assert_eq!(tags, vec!["later".to_string()]);
    }

    #[test]
    fn test_enum_counters_match_database_after_failed_bulk_insert() {
        use crate::coerce::Coercer;
        use crate::decompose::{BatchDriver, Decomposer};
        use serde_json::json;

        let catalog = Catalog::from_defs(CatalogDefs {
            tables: vec![
                TableDef::root("r").with_array_children(),
                TableDef::child("e", TableKind::Enum, "r", "c", "r_id"),
            ],
            fields: vec![
                FieldDef::new("r", "x", "x", "INTEGER"),
                FieldDef::array("r", "c", "c"),
                FieldDef::new("e", "v", "c[]", "TEXT"),
            ],
            relationships: vec![],
        })
        .unwrap();
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.connection()
            .execute_batch(
                "CREATE TABLE r (id INTEGER PRIMARY KEY AUTOINCREMENT, x INTEGER);
                 CREATE TABLE e (id INTEGER PRIMARY KEY AUTOINCREMENT, r_id INTEGER, v TEXT CHECK (v <> 'bad'));",
            )
            .unwrap();

        let summary = BatchDriver::new(Decomposer::new(&catalog, Coercer::default()))
            .run(vec![json!({"x": 1, "c": ["ok", "bad"]})], &mut sink)
            .unwrap();
        assert_eq!(summary.tables["e"].inserted, 0);
        assert_eq!(summary.tables["e"].failed, 2);
        assert_eq!(summary.root_rows, 1);

        let count = |table: &str| -> i64 {
            sink.connection()
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count("r"), 1);
        assert_eq!(count("e"), 0);
    }

    #[test]
    fn test_failed_commit_keeps_transaction_open() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.connection()
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE event (id INTEGER PRIMARY KEY AUTOINCREMENT);
                 CREATE TABLE event_tags (id INTEGER PRIMARY KEY AUTOINCREMENT,
                     event_id INTEGER REFERENCES event(id) DEFERRABLE INITIALLY DEFERRED);",
            )
            .unwrap();

        sink.begin_record().unwrap();
        sink.insert("event_tags", row(vec![("event_id", Datum::Integer(99))])).unwrap();
        assert!(sink.finish_record().is_err());
        assert!(!sink.connection().is_autocommit());

        // Still inside the same transaction, so no second BEGIN is issued
        assert!(sink.begin_record().is_ok());
        sink.rollback().unwrap();
        assert!(sink.connection().is_autocommit());
    }

    #[test]
    fn test_per_batch_commit_waits_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.db");
        let catalog = catalog();
        let mut sink = SqliteSink::open(&path).unwrap().with_commit_mode(CommitMode::PerBatch);
        sink.create_schema(&catalog).unwrap();

        sink.begin_record().unwrap();
        sink.insert("event", row(vec![("name", Datum::Text("x".into()))])).unwrap();
        sink.finish_record().unwrap();

        let reader = Connection::open(&path).unwrap();
        let count = |c: &Connection| -> i64 { c.query_row("SELECT COUNT(*) FROM event", [], |r| r.get(0)).unwrap() };
        assert_eq!(count(&reader), 0);

        sink.flush().unwrap();
        assert_eq!(count(&reader), 1);
    }

    #[test]
    fn test_id_column_collision_is_rejected() {
        let catalog = Catalog::from_defs(CatalogDefs {
            tables: vec![TableDef::root("event")],
            fields: vec![FieldDef::new("event", "id", "id", "TEXT")],
            relationships: vec![],
        })
        .unwrap();
        let sink = SqliteSink::in_memory().unwrap();
        assert!(matches!(sink.create_schema(&catalog), Err(SinkError::Rejected { .. })));
    }
}
