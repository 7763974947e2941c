//! Schema catalog - the compiled mapping from JSON paths to tables
//!
//! A [`Catalog`] is built once from [`CatalogDefs`] and is read-only
//! afterwards, so it can be shared freely between workers. Compilation does
//! all the lookups the decomposition engine would otherwise repeat for every
//! record:
//!
//! - tables live in an arena and refer to each other through [`TableId`]
//! - field paths are rewritten relative to the element a table is built from
//! - every array field is linked to its child table through a map keyed on
//!   the canonical source path
//!
//! Inconsistent definitions are rejected here with a [`CatalogError`], before
//! any record is read.

pub mod defs;
pub mod loader;

pub use defs::{CatalogDefs, FieldDef, RelationshipDef, TableDef, TableKind, TargetType};
pub use loader::{load_csv, load_csv_dir, load_json};

use crate::error::CatalogError;
use crate::path::PathExpr;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Handle of a table inside a [`Catalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

/// A scalar column of a table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Path relative to the JSON context the table is built from
    pub path: PathExpr,
    pub target: TargetType,
    pub max_length: Option<usize>,
}

/// An array field and the child table it feeds
#[derive(Debug, Clone)]
pub struct ArrayLink {
    pub field: String,
    /// Path relative to the owning table's context
    pub path: PathExpr,
    /// Canonical record-rooted path, used to match the child table
    pub source: String,
    /// `None` when no table declares this source path
    pub child: Option<TableId>,
}

/// An object child reached through its own source path rather than an
/// array field
#[derive(Debug, Clone)]
pub struct EmbeddedChild {
    pub table: TableId,
    pub path: PathExpr,
}

/// A compiled table definition
#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub kind: TableKind,
    pub parent: Option<TableId>,
    pub foreign_key: Option<String>,
    pub source_path: PathExpr,
    pub has_array_children: bool,
    pub columns: Vec<Column>,
    pub array_links: Vec<ArrayLink>,
    pub embedded: Vec<EmbeddedChild>,
    pub children: Vec<TableId>,
    value_column: Option<usize>,
}

impl Table {
    /// The column enum elements are written to. Only set for enum tables.
    pub fn value_column(&self) -> Option<&Column> {
        self.value_column.map(|idx| &self.columns[idx])
    }
}

/// Validated, read-only index of tables, fields and relationships
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: Vec<Table>,
    by_name: HashMap<String, TableId>,
    by_source: HashMap<String, TableId>,
    root: TableId,
}

impl Catalog {
    /// Compile and validate catalog definitions
    pub fn from_defs(defs: CatalogDefs) -> Result<Self, CatalogError> {
        let CatalogDefs {
            tables: table_defs,
            fields,
            relationships,
        } = defs;

        let mut by_name: HashMap<String, TableId> = HashMap::new();
        let mut tables: Vec<Table> = Vec::with_capacity(table_defs.len());

        for def in &table_defs {
            let id = TableId(tables.len());
            if by_name.insert(def.name.clone(), id).is_some() {
                return Err(CatalogError::DuplicateTable(def.name.clone()));
            }

            let source_path = parse_path(&def.source_path, &def.name)?;
            if def.kind != TableKind::Root && source_path.is_empty() {
                return Err(CatalogError::MissingSourcePath(def.name.clone()));
            }
            if def.kind == TableKind::Root && !source_path.is_empty() {
                debug!(table = %def.name, path = %source_path, "ignoring source path of root table");
            }

            tables.push(Table {
                id,
                name: def.name.clone(),
                kind: def.kind,
                parent: None,
                foreign_key: def.foreign_key_field.clone().filter(|fk| !fk.is_empty()),
                source_path,
                has_array_children: def.has_array_children,
                columns: Vec::new(),
                array_links: Vec::new(),
                embedded: Vec::new(),
                children: Vec::new(),
                value_column: None,
            });
        }

        let roots: Vec<&TableDef> = table_defs.iter().filter(|d| d.kind == TableKind::Root).collect();
        let root = match roots.as_slice() {
            [] => return Err(CatalogError::NoRootTable),
            [only] => by_name[&only.name],
            many => {
                return Err(CatalogError::MultipleRootTables(
                    many.iter().map(|d| d.name.clone()).collect(),
                ))
            }
        };

        // Relationships confirm the declared parent and supply missing
        // foreign keys
        for rel in &relationships {
            let child = *by_name
                .get(&rel.child_table)
                .ok_or_else(|| CatalogError::UnknownRelationshipTable(rel.child_table.clone()))?;
            if !by_name.contains_key(&rel.parent_table) {
                return Err(CatalogError::UnknownRelationshipTable(rel.parent_table.clone()));
            }

            let declared = declared_parent(&table_defs[child.0]);
            if declared != Some(rel.parent_table.as_str()) {
                return Err(CatalogError::RelationshipMismatch {
                    child: rel.child_table.clone(),
                    detail: format!(
                        "relationship names parent `{}`, table declares {:?}",
                        rel.parent_table, declared
                    ),
                });
            }

            let table = &mut tables[child.0];
            match &table.foreign_key {
                None => table.foreign_key = Some(rel.foreign_key_field.clone()),
                Some(fk) if *fk == rel.foreign_key_field => {}
                Some(fk) => {
                    return Err(CatalogError::RelationshipMismatch {
                        child: rel.child_table.clone(),
                        detail: format!(
                            "relationship foreign key `{}`, table declares `{}`",
                            rel.foreign_key_field, fk
                        ),
                    })
                }
            }
        }

        for (idx, def) in table_defs.iter().enumerate() {
            match (def.kind, declared_parent(def)) {
                (TableKind::Root, Some(_)) => return Err(CatalogError::RootHasParent(def.name.clone())),
                (TableKind::Root, None) => {}
                (_, None) => return Err(CatalogError::MissingParent(def.name.clone())),
                (_, Some(parent)) => {
                    let parent_id = by_name.get(parent).copied().ok_or_else(|| CatalogError::DanglingParent {
                        table: def.name.clone(),
                        parent: parent.to_string(),
                    })?;
                    if tables[idx].foreign_key.is_none() {
                        return Err(CatalogError::MissingForeignKey(def.name.clone()));
                    }
                    tables[idx].parent = Some(parent_id);
                    tables[parent_id.0].children.push(TableId(idx));
                }
            }
        }

        // With a single root and a parent on every other table, any chain
        // that does not end at the root loops
        for table in &tables {
            let mut hops = 0;
            let mut current = table.parent;
            while let Some(parent) = current {
                hops += 1;
                if hops > tables.len() {
                    return Err(CatalogError::ParentCycle(table.name.clone()));
                }
                current = tables[parent.0].parent;
            }
        }

        let mut by_source: HashMap<String, TableId> = HashMap::new();
        for table in tables.iter().filter(|t| t.kind != TableKind::Root) {
            let key = table.source_path.canonical();
            if let Some(previous) = by_source.insert(key.clone(), table.id) {
                return Err(CatalogError::DuplicateSourcePath {
                    path: key,
                    first: tables[previous.0].name.clone(),
                    second: table.name.clone(),
                });
            }
        }

        for field in fields {
            let Some(&table_id) = by_name.get(&field.table) else {
                return Err(CatalogError::UnknownFieldTable {
                    table: field.table,
                    field: field.name,
                });
            };

            let owner = format!("{}.{}", field.table, field.name);
            if field.source_path.trim().is_empty() {
                return Err(CatalogError::MissingSourcePath(owner));
            }
            let absolute = parse_path(&field.source_path, &owner)?;

            let table = &mut tables[table_id.0];
            let taken = table.columns.iter().any(|c| c.name == field.name)
                || table.array_links.iter().any(|l| l.field == field.name);
            if taken {
                return Err(CatalogError::DuplicateField {
                    table: field.table,
                    field: field.name,
                });
            }

            let path = relative_to(&absolute, &table.source_path, table.kind);
            if field.is_array {
                table.array_links.push(ArrayLink {
                    field: field.name,
                    path,
                    source: absolute.canonical(),
                    child: None,
                });
            } else {
                let (target, declared_length) =
                    TargetType::parse_decl(&field.target_type).ok_or_else(|| CatalogError::UnknownTargetType {
                        table: field.table.clone(),
                        field: field.name.clone(),
                        declared: field.target_type.clone(),
                    })?;
                table.columns.push(Column {
                    name: field.name,
                    path,
                    target,
                    max_length: field.max_length.or(declared_length),
                });
            }
        }

        for idx in 0..tables.len() {
            for link_idx in 0..tables[idx].array_links.len() {
                let source = tables[idx].array_links[link_idx].source.clone();
                let Some(child) = by_source.get(&source).copied() else {
                    warn!(
                        table = %tables[idx].name,
                        field = %tables[idx].array_links[link_idx].field,
                        path = %source,
                        "array field has no child table and will be skipped"
                    );
                    continue;
                };
                if tables[child.0].parent != Some(TableId(idx)) {
                    let parent = tables[child.0]
                        .parent
                        .map(|p| tables[p.0].name.clone())
                        .unwrap_or_default();
                    return Err(CatalogError::ParentMismatch {
                        table: tables[idx].name.clone(),
                        field: tables[idx].array_links[link_idx].field.clone(),
                        child: tables[child.0].name.clone(),
                        parent,
                    });
                }
                tables[idx].array_links[link_idx].child = Some(child);
            }
        }

        for idx in 0..tables.len() {
            let linked: Vec<TableId> = tables[idx].array_links.iter().filter_map(|l| l.child).collect();
            let mut embedded = Vec::new();
            for &child in &tables[idx].children {
                if linked.contains(&child) {
                    continue;
                }
                let child_table = &tables[child.0];
                if child_table.kind == TableKind::Object {
                    embedded.push(EmbeddedChild {
                        table: child,
                        path: relative_to(&child_table.source_path, &tables[idx].source_path, tables[idx].kind),
                    });
                } else {
                    warn!(
                        table = %child_table.name,
                        parent = %tables[idx].name,
                        "no array field of the parent targets this table; it will receive no rows"
                    );
                }
            }
            tables[idx].embedded = embedded;
        }

        for table in tables.iter_mut().filter(|t| t.kind == TableKind::Enum) {
            let fk = table.foreign_key.as_deref();
            let candidates: Vec<usize> = table
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| Some(c.name.as_str()) != fk)
                .map(|(idx, _)| idx)
                .collect();
            let Some(&first) = candidates.first() else {
                return Err(CatalogError::EnumWithoutValueField(table.name.clone()));
            };
            if candidates.len() > 1 {
                warn!(
                    table = %table.name,
                    column = %table.columns[first].name,
                    "enum table has several value fields; using the first"
                );
            }
            table.value_column = Some(first);
        }

        for table in &tables {
            if table.has_array_children != !table.array_links.is_empty() {
                warn!(
                    table = %table.name,
                    declared = table.has_array_children,
                    array_fields = table.array_links.len(),
                    "has-array-children flag disagrees with the table's fields"
                );
            }
            debug!(
                table = %table.name,
                kind = %table.kind,
                columns = table.columns.len(),
                array_fields = table.array_links.len(),
                foreign_key = ?table.foreign_key,
                "compiled table"
            );
        }

        Ok(Catalog {
            tables,
            by_name,
            by_source,
            root,
        })
    }

    pub fn root(&self) -> &Table {
        &self.tables[self.root.0]
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    /// Look a table up by name
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.by_name.get(name).map(|id| &self.tables[id.0])
    }

    /// The table whose instances originate from `path`
    pub fn table_for_path(&self, path: &str) -> Option<&Table> {
        let key = PathExpr::parse(path).canonical();
        self.by_source.get(&key).map(|id| &self.tables[id.0])
    }

    /// Tables in declaration order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn declared_parent(def: &TableDef) -> Option<&str> {
    def.parent_table.as_deref().map(str::trim).filter(|p| !p.is_empty())
}

fn parse_path(text: &str, owner: &str) -> Result<PathExpr, CatalogError> {
    PathExpr::parse_strict(text).map_err(|source| CatalogError::MalformedPath {
        owner: owner.to_string(),
        source,
    })
}

/// Rewrite a record-rooted path relative to the context a table is built
/// from. Paths outside the table's source path are taken as already
/// relative.
fn relative_to(path: &PathExpr, table_path: &PathExpr, kind: TableKind) -> PathExpr {
    if kind == TableKind::Root {
        return path.clone();
    }
    path.strip_prefix(table_path).unwrap_or_else(|| path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_defs() -> CatalogDefs {
        CatalogDefs {
            tables: vec![
                TableDef::root("r").with_array_children(),
                TableDef::child("e", TableKind::Enum, "r", "a.c", "r_id"),
            ],
            fields: vec![
                FieldDef::new("r", "x", "a.b", "INTEGER"),
                FieldDef::array("r", "c", "a.c"),
                FieldDef::new("e", "v", "a.c[]", "INTEGER"),
            ],
            relationships: vec![RelationshipDef::new("e", "r", "r_id")],
        }
    }

    #[test]
    fn test_compile_scenario_catalog() {
        let catalog = Catalog::from_defs(scenario_defs()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.root().name, "r");
        assert_eq!(catalog.root().columns.len(), 1);
        assert_eq!(catalog.root().columns[0].target, TargetType::Integer);

        let link = &catalog.root().array_links[0];
        let child = catalog.table(link.child.unwrap());
        assert_eq!(child.name, "e");
        assert_eq!(child.foreign_key.as_deref(), Some("r_id"));
        assert_eq!(child.value_column().unwrap().name, "v");
        assert_eq!(catalog.table_for_path("a.c[]").unwrap().name, "e");
    }

    #[test]
    fn test_relationship_supplies_foreign_key() {
        let mut defs = scenario_defs();
        defs.tables[1].foreign_key_field = None;
        let catalog = Catalog::from_defs(defs).unwrap();
        assert_eq!(catalog.get("e").unwrap().foreign_key.as_deref(), Some("r_id"));
    }

    #[test]
    fn test_child_field_paths_are_relative() {
        let defs = CatalogDefs {
            tables: vec![
                TableDef::root("event"),
                TableDef::child("event_device", TableKind::Array, "event", "device", "event_id"),
            ],
            fields: vec![
                FieldDef::array("event", "device", "device"),
                FieldDef::new("event_device", "brand", "device[].brand_name", "TEXT"),
                FieldDef::new("event_device", "model", "model_number", "TEXT"),
            ],
            relationships: vec![],
        };
        let catalog = Catalog::from_defs(defs).unwrap();
        let device = catalog.get("event_device").unwrap();
        assert_eq!(device.columns[0].path.canonical(), "brand_name");
        assert_eq!(device.columns[1].path.canonical(), "model_number");
    }

    #[test]
    fn test_embedded_object_child() {
        let defs = CatalogDefs {
            tables: vec![
                TableDef::root("event"),
                TableDef::child("event_patient", TableKind::Object, "event", "patient", "event_id"),
            ],
            fields: vec![FieldDef::new("event_patient", "age", "patient.age", "INTEGER")],
            relationships: vec![],
        };
        let catalog = Catalog::from_defs(defs).unwrap();
        let embedded = &catalog.root().embedded;
        assert_eq!(embedded.len(), 1);
        assert_eq!(catalog.table(embedded[0].table).name, "event_patient");
        assert_eq!(embedded[0].path.canonical(), "patient");
    }

    #[test]
    fn test_structural_errors() {
        let mut defs = scenario_defs();
        defs.tables.push(TableDef::root("r"));
        assert!(matches!(Catalog::from_defs(defs), Err(CatalogError::DuplicateTable(_))));

        let mut defs = scenario_defs();
        defs.tables.push(TableDef::root("other"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::MultipleRootTables(_))
        ));

        let mut defs = scenario_defs();
        defs.tables.remove(0);
        defs.fields.clear();
        defs.relationships.clear();
        assert!(matches!(Catalog::from_defs(defs), Err(CatalogError::NoRootTable)));

        let mut defs = scenario_defs();
        defs.tables[1].parent_table = Some("ghost".to_string());
        defs.relationships.clear();
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::DanglingParent { .. })
        ));

        let mut defs = scenario_defs();
        defs.tables[1].foreign_key_field = None;
        defs.relationships.clear();
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::MissingForeignKey(_))
        ));
    }

    #[test]
    fn test_parent_cycle() {
        let defs = CatalogDefs {
            tables: vec![
                TableDef::root("r"),
                TableDef::child("a", TableKind::Object, "b", "x", "b_id"),
                TableDef::child("b", TableKind::Object, "a", "y", "a_id"),
            ],
            fields: vec![],
            relationships: vec![],
        };
        assert!(matches!(Catalog::from_defs(defs), Err(CatalogError::ParentCycle(_))));
    }

    #[test]
    fn test_relationship_errors() {
        let mut defs = scenario_defs();
        defs.relationships.push(RelationshipDef::new("ghost", "r", "r_id"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::UnknownRelationshipTable(_))
        ));

        let mut defs = scenario_defs();
        defs.relationships[0].foreign_key_field = "parent_id".to_string();
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::RelationshipMismatch { .. })
        ));
    }

    #[test]
    fn test_field_errors() {
        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("r", "y", "", "TEXT"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::MissingSourcePath(_))
        ));

        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("r", "y", "a.b[x]", "TEXT"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::MalformedPath { .. })
        ));

        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("r", "y", "a.y", "GEOMETRY"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::UnknownTargetType { .. })
        ));

        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("r", "x", "a.z", "TEXT"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::DuplicateField { .. })
        ));

        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("ghost", "y", "a.y", "TEXT"));
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::UnknownFieldTable { .. })
        ));

        let mut defs = scenario_defs();
        defs.fields.retain(|f| f.table != "e");
        assert!(matches!(
            Catalog::from_defs(defs),
            Err(CatalogError::EnumWithoutValueField(_))
        ));
    }

    #[test]
    fn test_unmapped_array_field_is_not_fatal() {
        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::array("r", "tags", "a.tags"));
        let catalog = Catalog::from_defs(defs).unwrap();
        let link = catalog.root().array_links.iter().find(|l| l.field == "tags").unwrap();
        assert!(link.child.is_none());
    }

    #[test]
    fn test_varchar_length_fills_max_length() {
        let mut defs = scenario_defs();
        defs.fields.push(FieldDef::new("r", "name", "a.name", "VARCHAR(12)"));
        defs.fields.push(FieldDef::new("r", "code", "a.code", "VARCHAR(12)").with_max_length(4));
        let catalog = Catalog::from_defs(defs).unwrap();
        let root = catalog.root();
        assert_eq!(root.columns[1].max_length, Some(12));
        assert_eq!(root.columns[2].max_length, Some(4));
    }
}
