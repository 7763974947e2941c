//! Loading catalog definitions from disk
//!
//! Two formats are supported:
//!
//! - three CSV files (tables, fields, relationships) with the column names
//!   the catalog generator writes (`table_name`, `table_type`,
//!   `original_path`, `is_array`, ...), flags as `Yes`/`No`
//! - one JSON document holding `{"tables": [...], "fields": [...],
//!   "relationships": [...]}`

use crate::catalog::defs::{CatalogDefs, FieldDef, RelationshipDef, TableDef, TableKind};
use crate::catalog::Catalog;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(alias = "table_name")]
    name: String,
    #[serde(alias = "table_type", alias = "type")]
    kind: String,
    #[serde(default, alias = "parent")]
    parent_table: Option<String>,
    #[serde(default, alias = "has_arrays", deserialize_with = "deserialize_flag")]
    has_array_children: bool,
    #[serde(default, alias = "path")]
    source_path: Option<String>,
    #[serde(default, alias = "fk_field")]
    foreign_key_field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldRow {
    #[serde(alias = "table_name")]
    table: String,
    #[serde(alias = "field_name")]
    name: String,
    #[serde(alias = "original_path", alias = "path")]
    source_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    is_array: bool,
    #[serde(default, alias = "data_type")]
    target_type: Option<String>,
    #[serde(default)]
    max_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RelationshipRow {
    child_table: String,
    parent_table: String,
    #[serde(alias = "fk_field")]
    foreign_key_field: String,
    #[serde(default)]
    relationship_type: Option<String>,
}

/// Accepts `Yes`/`No`, `true`/`false`, `Y`/`N`, `1`/`0`; empty means false
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let normalized = raw.map(|s| s.trim().to_ascii_lowercase());
    Ok(matches!(normalized.as_deref(), Some("yes" | "y" | "true" | "1")))
}

fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input)
}

/// Parse the three CSV definitions from arbitrary readers
pub fn read_csv_defs<T: Read, F: Read, R: Read>(tables: T, fields: F, relationships: R) -> Result<CatalogDefs> {
    let mut defs = CatalogDefs::default();

    for (idx, row) in csv_reader(tables).deserialize::<TableRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to parse table definition at row {}", idx + 1))?;
        let kind: TableKind = row
            .kind
            .parse()
            .map_err(|e: String| anyhow!(e))
            .with_context(|| format!("Invalid kind for table `{}`", row.name))?;
        defs.tables.push(TableDef {
            name: row.name,
            kind,
            parent_table: row.parent_table.filter(|p| !p.is_empty()),
            source_path: row.source_path.unwrap_or_default(),
            foreign_key_field: row.foreign_key_field.filter(|fk| !fk.is_empty()),
            has_array_children: row.has_array_children,
        });
    }

    for (idx, row) in csv_reader(fields).deserialize::<FieldRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to parse field definition at row {}", idx + 1))?;
        defs.fields.push(FieldDef {
            table: row.table,
            name: row.name,
            source_path: row.source_path.unwrap_or_default(),
            is_array: row.is_array,
            target_type: row.target_type.unwrap_or_default(),
            max_length: row.max_length,
        });
    }

    for (idx, row) in csv_reader(relationships).deserialize::<RelationshipRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to parse relationship definition at row {}", idx + 1))?;
        defs.relationships.push(RelationshipDef {
            child_table: row.child_table,
            parent_table: row.parent_table,
            foreign_key_field: row.foreign_key_field,
            relationship_type: row.relationship_type,
        });
    }

    Ok(defs)
}

/// Load and compile a catalog from three CSV files
pub fn load_csv<P: AsRef<Path>>(tables: P, fields: P, relationships: P) -> Result<Catalog> {
    let open = |path: &Path| {
        std::fs::File::open(path).with_context(|| format!("Failed to open catalog file: {}", path.display()))
    };
    let defs = read_csv_defs(
        open(tables.as_ref())?,
        open(fields.as_ref())?,
        open(relationships.as_ref())?,
    )?;
    tracing::info!(
        tables = defs.tables.len(),
        fields = defs.fields.len(),
        relationships = defs.relationships.len(),
        "read catalog definitions"
    );
    Catalog::from_defs(defs).context("Catalog definitions are inconsistent")
}

/// Load a catalog from a directory holding `*tables.csv`, `*fields.csv` and
/// `*relationships.csv` (e.g. `event_tables.csv`).
pub fn load_csv_dir<P: AsRef<Path>>(dir: P) -> Result<Catalog> {
    let dir = dir.as_ref();
    let mut found: [Option<PathBuf>; 3] = [None, None, None];

    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read catalog directory: {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let slot = if name.ends_with("relationships.csv") {
            2
        } else if name.ends_with("fields.csv") {
            1
        } else if name.ends_with("tables.csv") {
            0
        } else {
            continue;
        };
        if found[slot].is_some() {
            return Err(anyhow!("Several candidate catalog files for `{}` in {}", name, dir.display()));
        }
        found[slot] = Some(path);
    }

    let [Some(tables), Some(fields), Some(relationships)] = found else {
        return Err(anyhow!(
            "Catalog directory {} must contain tables, fields and relationships CSV files",
            dir.display()
        ));
    };
    load_csv(tables, fields, relationships)
}

/// Load and compile a catalog from a single JSON file
pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Catalog> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open catalog file: {}", path.display()))?;
    let defs: CatalogDefs = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse catalog JSON: {}", path.display()))?;
    Catalog::from_defs(defs).context("Catalog definitions are inconsistent")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetType;

    const TABLES: &str = "\
table_name,table_type,parent_table,has_arrays,path
event,main,,Yes,
event_device,array,event,No,device
event_tags,enum,event,No,tags
";

    const FIELDS: &str = "\
table_name,field_name,original_path,is_array,data_type,max_length
event,report_number,report_number,No,VARCHAR(20),
event,date_received,date_received,No,DATE,
event,device,device,Yes,ARRAY,
event,tags,tags,Yes,ARRAY,
event_device,brand_name,device[].brand_name,No,TEXT,40
event_tags,tag,tags[],No,TEXT,
";

    const RELATIONSHIPS: &str = "\
child_table,parent_table,foreign_key_field,relationship_type
event_device,event,event_id,one-to-many
event_tags,event,event_id,one-to-many
";

    #[test]
    fn test_read_csv_defs() {
        let defs = read_csv_defs(TABLES.as_bytes(), FIELDS.as_bytes(), RELATIONSHIPS.as_bytes()).unwrap();

        assert_eq!(defs.tables.len(), 3);
        assert_eq!(defs.tables[0].kind, TableKind::Root);
        assert!(defs.tables[0].has_array_children);
        assert_eq!(defs.tables[0].parent_table, None);
        assert_eq!(defs.tables[1].source_path, "device");

        assert_eq!(defs.fields.len(), 6);
        assert!(defs.fields[2].is_array);
        assert_eq!(defs.fields[4].max_length, Some(40));
        assert_eq!(defs.fields[0].max_length, None);

        assert_eq!(defs.relationships[0].relationship_type.as_deref(), Some("one-to-many"));
    }

    #[test]
    fn test_compile_from_csv() {
        let defs = read_csv_defs(TABLES.as_bytes(), FIELDS.as_bytes(), RELATIONSHIPS.as_bytes()).unwrap();
        let catalog = Catalog::from_defs(defs).unwrap();

        let root = catalog.root();
        assert_eq!(root.name, "event");
        assert_eq!(root.columns[0].max_length, Some(20));
        assert_eq!(root.columns[1].target, TargetType::Date);
        assert_eq!(root.array_links.len(), 2);
        assert!(root.array_links.iter().all(|l| l.child.is_some()));
        assert_eq!(catalog.get("event_device").unwrap().foreign_key.as_deref(), Some("event_id"));
    }

    #[test]
    fn test_invalid_table_kind() {
        let tables = "table_name,table_type\nevent,matrix\n";
        let err = read_csv_defs(tables.as_bytes(), FIELDS.as_bytes(), RELATIONSHIPS.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("matrix"));
    }

    #[test]
    fn test_load_csv_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("event_tables.csv"), TABLES).unwrap();
        std::fs::write(dir.path().join("event_fields.csv"), FIELDS).unwrap();
        std::fs::write(dir.path().join("event_relationships.csv"), RELATIONSHIPS).unwrap();

        let catalog = load_csv_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_load_csv_dir_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("event_tables.csv"), TABLES).unwrap();
        assert!(load_csv_dir(dir.path()).is_err());
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let doc = serde_json::json!({
            "tables": [
                {"name": "r", "kind": "root", "has_array_children": true},
                {"name": "e", "kind": "enum", "parent_table": "r", "source_path": "a.c", "foreign_key_field": "r_id"}
            ],
            "fields": [
                {"table": "r", "name": "x", "source_path": "a.b", "target_type": "INTEGER"},
                {"table": "r", "name": "c", "source_path": "a.c", "is_array": true},
                {"table": "e", "name": "v", "source_path": "a.c[]", "target_type": "INTEGER"}
            ]
        });
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let catalog = load_json(&path).unwrap();
        assert_eq!(catalog.root().name, "r");
        assert_eq!(catalog.get("e").unwrap().value_column().unwrap().name, "v");
    }
}
