use crate::error::SinkError;
use crate::sink::RowSink;
use crate::types::{Datum, GeneratedKey, Row};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column holding a row's generated key in JSON-lines output
pub const ID_COLUMN: &str = "_id";

/// Column naming the table a row belongs to in single-stream output
pub const TABLE_COLUMN: &str = "_table";

/// Synthetic key source shared by the JSON-lines sinks
#[derive(Debug, Default)]
struct KeyGen {
    prefix: String,
    counter: u64,
}

impl KeyGen {
    fn next(&mut self) -> GeneratedKey {
        self.counter += 1;
        GeneratedKey::Text(format!("_gen_{}{}", self.prefix, self.counter))
    }
}

fn with_key(key: &GeneratedKey, row: Row) -> Row {
    let mut out = Row::with_capacity(row.len() + 1);
    out.insert(ID_COLUMN.to_string(), Datum::Key(key.clone()));
    out.extend(row);
    out
}

/// Writes rows to one JSON Lines file per table (`<table>.jsonl`)
pub struct JsonlDirSink {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
    keys: KeyGen,
}

impl JsonlDirSink {
    /// Create a sink writing into `output_dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(JsonlDirSink {
            dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
            keys: KeyGen::default(),
        })
    }

    /// Prefix generated keys, so several sinks can feed the same output
    /// without key collisions
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys.prefix = prefix.into();
        self
    }

    fn write_row(&mut self, table: &str, row: &Row) -> Result<(), SinkError> {
        let writer = match self.writers.entry(table.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.dir.join(format!("{}.jsonl", table));
                let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
                entry.insert(BufWriter::new(file))
            }
        };
        serde_json::to_writer(&mut *writer, row)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl RowSink for JsonlDirSink {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        let key = self.keys.next();
        self.write_row(table, &with_key(&key, row))?;
        Ok(key)
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        for row in &rows {
            self.write_row(table, row)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Writes all rows to a single JSON Lines stream, tagging each with its
/// table name
pub struct JsonlStreamSink<W: Write> {
    writer: W,
    keys: KeyGen,
}

impl<W: Write> JsonlStreamSink<W> {
    pub fn new(writer: W) -> Self {
        JsonlStreamSink {
            writer,
            keys: KeyGen::default(),
        }
    }

    fn write_row(&mut self, table: &str, row: Row) -> Result<(), SinkError> {
        let mut tagged = Row::with_capacity(row.len() + 1);
        tagged.insert(TABLE_COLUMN.to_string(), Datum::Text(table.to_string()));
        tagged.extend(row);
        serde_json::to_writer(&mut self.writer, &tagged)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> RowSink for JsonlStreamSink<W> {
    fn insert(&mut self, table: &str, row: Row) -> Result<GeneratedKey, SinkError> {
        let key = self.keys.next();
        self.write_row(table, with_key(&key, row))?;
        Ok(key)
    }

    fn bulk_insert(&mut self, table: &str, rows: Vec<Row>) -> Result<(), SinkError> {
        for row in rows {
            self.write_row(table, row)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
