use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VdbError};
use crate::sql::{qualified, quote, scratch_name, MATCHED};

/// Bit width of the per-container record index in root identities.
pub const DEFAULT_RECORD_BITS: u32 = 20;

/// Name given to the container-id column by [`ColumnMeta::container_id`].
pub const CONTAINER_ID: &str = "container_id";

/// Ordinal at which every table declares its container-id column.
pub const CONTAINER_ID_ORDINAL: usize = 1;

/// Computes a column value from the record a cursor is positioned on.
pub type Extractor = Arc<dyn Fn(&Value) -> SqlValue + Send + Sync>;

/// Selects the embedded elements a detail table iterates over.
pub type MultiExtractor = Arc<dyn for<'v> Fn(&'v Value) -> &'v [Value] + Send + Sync>;

/// Declared SQL type of a column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
}

impl ColumnType {
    /// Returns the SQLite type affinity string for this column type.
    pub fn to_sqlite_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }
}

/// Where a column's value comes from.
#[derive(Clone)]
pub enum ColumnSource {
    /// The row's composite identity.
    Rowid,
    /// The id of the container the row was read from.
    ContainerId,
    /// The composite identity of the enclosing record.
    ParentRowid,
    /// A function of the current record.
    Extract(Extractor),
    /// Declared but never filled.
    Empty,
}

impl fmt::Debug for ColumnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSource::Rowid => write!(f, "Rowid"),
            ColumnSource::ContainerId => write!(f, "ContainerId"),
            ColumnSource::ParentRowid => write!(f, "ParentRowid"),
            ColumnSource::Extract(_) => write!(f, "Extract(..)"),
            ColumnSource::Empty => write!(f, "Empty"),
        }
    }
}

/// One column of a [`TableMeta`].
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    name: String,
    source: ColumnSource,
    description: Option<String>,
    data_type: Option<ColumnType>,
    row_identifier: bool,
}

impl ColumnMeta {
    /// A column computed from the current record.
    pub fn new(name: &str, extract: impl Fn(&Value) -> SqlValue + Send + Sync + 'static) -> Self {
        Self::with_source(name, ColumnSource::Extract(Arc::new(extract)))
    }

    /// A column holding the row's own composite identity.
    pub fn rowid(name: &str) -> Self {
        Self::with_source(name, ColumnSource::Rowid).with_type(ColumnType::Integer)
    }

    /// The container-id column, declared at ordinal 1 of every table.
    pub fn container_id() -> Self {
        Self::with_source(CONTAINER_ID, ColumnSource::ContainerId)
            .with_type(ColumnType::Integer)
            .with_description("Identifier of the container the row was read from")
    }

    /// A column holding the enclosing record's composite identity.
    pub fn parent_rowid(name: &str) -> Self {
        Self::with_source(name, ColumnSource::ParentRowid).with_type(ColumnType::Integer)
    }

    /// A column declared for compatibility but never filled.
    pub fn empty(name: &str) -> Self {
        Self::with_source(name, ColumnSource::Empty)
    }

    pub fn with_source(name: &str, source: ColumnSource) -> Self {
        Self {
            name: name.to_string(),
            source,
            description: None,
            data_type: None,
            row_identifier: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_type(mut self, data_type: ColumnType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Marks the column as the destination table's row identifier
    /// (`INTEGER PRIMARY KEY`).
    pub fn as_row_identifier(mut self) -> Self {
        self.row_identifier = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ColumnSource {
        &self.source
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn data_type(&self) -> Option<ColumnType> {
        self.data_type
    }

    pub fn is_row_identifier(&self) -> bool {
        self.row_identifier
    }

    pub fn extractor(&self) -> Option<&Extractor> {
        match &self.source {
            ColumnSource::Extract(f) => Some(f),
            _ => None,
        }
    }

    /// Column definition for a concrete destination table.
    pub fn definition(&self) -> String {
        if self.row_identifier {
            return format!("{} INTEGER PRIMARY KEY", quote(&self.name));
        }
        self.declaration()
    }

    /// Column declaration for the virtual table; never a key.
    fn declaration(&self) -> String {
        match self.data_type {
            Some(t) => format!("{} {}", quote(&self.name), t.to_sqlite_type()),
            None => quote(&self.name),
        }
    }
}

/// How a table's cursor finds its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorKind {
    /// Top-level records of each container; identity `container << bits | index`.
    Records { bits: u32 },
    /// Elements embedded in the parent's current record under `path`;
    /// identity `parent << bits | index`.
    Elements { path: Vec<String>, bits: u32 },
}

impl CursorKind {
    pub fn bits(&self) -> u32 {
        match self {
            CursorKind::Records { bits } | CursorKind::Elements { bits, .. } => *bits,
        }
    }
}

/// Edge from a detail table to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Name of the parent table.
    pub parent_name: String,
    /// Column of this table holding the parent's key.
    pub foreign_key: String,
    /// Column of the parent table referenced by `foreign_key`.
    pub primary_key: String,
}

/// Static description of one table of the tree.
#[derive(Clone)]
pub struct TableMeta {
    name: String,
    parent: Option<ParentLink>,
    cursor: CursorKind,
    columns: Vec<ColumnMeta>,
    extract_multiple: Option<MultiExtractor>,
    post_population_script: Option<String>,
}

impl fmt::Debug for TableMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableMeta")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("cursor", &self.cursor)
            .field("columns", &self.columns)
            .field("extract_multiple", &self.extract_multiple.is_some())
            .finish()
    }
}

impl TableMeta {
    /// A root table iterating container records, with no columns yet.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            cursor: CursorKind::Records { bits: DEFAULT_RECORD_BITS },
            columns: Vec::new(),
            extract_multiple: None,
            post_population_script: None,
        }
    }

    /// Links the table to `parent_name`: `foreign_key` here references
    /// `primary_key` there.
    pub fn parent(mut self, parent_name: &str, foreign_key: &str, primary_key: &str) -> Self {
        self.parent = Some(ParentLink {
            parent_name: parent_name.to_string(),
            foreign_key: foreign_key.to_string(),
            primary_key: primary_key.to_string(),
        });
        self
    }

    /// Iterates the elements under the dotted `path` of the parent record.
    pub fn elements(mut self, path: &str, bits: u32) -> Self {
        let path = path.split('.').map(str::to_string).collect();
        self.cursor = CursorKind::Elements { path, bits };
        self
    }

    /// Sets the bit width of a root table's record index.
    pub fn record_bits(mut self, bits: u32) -> Self {
        self.cursor = CursorKind::Records { bits };
        self
    }

    /// Selects the iterated elements with a function instead of a path.
    pub fn extract_multiple(
        mut self,
        select: impl for<'v> Fn(&'v Value) -> &'v [Value] + Send + Sync + 'static,
    ) -> Self {
        self.extract_multiple = Some(Arc::new(select));
        self
    }

    pub fn columns(mut self, columns: Vec<ColumnMeta>) -> Self {
        self.columns = columns;
        self
    }

    /// SQL run against the destination after population.
    pub fn post_population_script(mut self, script: &str) -> Self {
        self.post_population_script = Some(script.to_string());
        self
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_link(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.parent_name.as_str())
    }

    pub fn cursor_kind(&self) -> &CursorKind {
        &self.cursor
    }

    pub fn multi_extractor(&self) -> Option<&MultiExtractor> {
        self.extract_multiple.as_ref()
    }

    pub fn script(&self) -> Option<&str> {
        self.post_population_script.as_deref()
    }

    pub fn column_list(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_ordinal(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Name of the container-id column.
    pub fn container_column(&self) -> &str {
        self.columns
            .get(CONTAINER_ID_ORDINAL)
            .map_or(CONTAINER_ID, |c| c.name.as_str())
    }

    pub fn value_extractor_by_ordinal(&self, ordinal: usize) -> Option<&Extractor> {
        self.columns.get(ordinal).and_then(ColumnMeta::extractor)
    }

    /// The extractor of column `name`; `None` for identity and empty columns.
    pub fn value_extractor_by_name(&self, name: &str) -> Result<Option<&Extractor>> {
        self.column(name)
            .map(ColumnMeta::extractor)
            .ok_or_else(|| VdbError::unknown_column(&self.name, name))
    }

    // ── Statement text ────────────────────────────────────────

    /// `CREATE TABLE` statement for a concrete copy of this table, in the
    /// given attached database, restricted to `columns` when given. Columns
    /// are always emitted in declaration order.
    pub fn table_schema(&self, database: Option<&str>, columns: Option<&[&str]>) -> Result<String> {
        if let Some(wanted) = columns {
            for name in wanted {
                if self.column(name).is_none() {
                    return Err(VdbError::unknown_column(&self.name, name));
                }
            }
        }
        let defs: Vec<String> = self
            .columns
            .iter()
            .filter(|c| columns.map_or(true, |wanted| wanted.contains(&c.name.as_str())))
            .map(|c| format!("  {}", c.definition()))
            .collect();
        if defs.is_empty() {
            return Err(VdbError::InvalidSchema(format!("no columns selected for {}", self.name)));
        }
        Ok(format!(
            "CREATE TABLE {}(\n{}\n);\n",
            qualified(database, &self.name),
            defs.join(",\n")
        ))
    }

    /// Declaration handed to SQLite when the virtual table is connected.
    pub fn virtual_table_schema(&self) -> String {
        let decls: Vec<String> = self.columns.iter().map(ColumnMeta::declaration).collect();
        format!("CREATE TABLE x({})", decls.join(", "))
    }

    /// Parameterised `INSERT` over all columns, in declaration order.
    pub fn insert_statement(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote(&c.name)).collect();
        let params = vec!["?"; names.len()];
        format!(
            "INSERT INTO {}({}) VALUES ({});",
            quote(&self.name),
            names.join(", "),
            params.join(", ")
        )
    }
}

// ─────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────

/// Column listing entry of [`Schema::describe`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: Option<ColumnType>,
    pub description: Option<String>,
}

/// Table listing entry of [`Schema::describe`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDescription {
    pub name: String,
    pub parent: Option<String>,
    pub columns: Vec<ColumnDescription>,
}

/// A validated tree of tables with a single root.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<TableMeta>,
    by_name: HashMap<String, usize>,
    root: usize,
}

impl Schema {
    /// Validates `tables` and builds the schema.
    ///
    /// Returns [`VdbError::InvalidSchema`] unless there is exactly one root,
    /// every parent link resolves to a declared table and key columns,
    /// parent chains reach the root without cycles, names are plain
    /// identifiers clear of the `temp_` scratch namespace, and every table declares its container-id column at
    /// ordinal 1.
    pub fn new(tables: Vec<TableMeta>) -> Result<Self> {
        let invalid = |msg: String| Err(VdbError::InvalidSchema(msg));

        let mut by_name = HashMap::with_capacity(tables.len());
        for (i, t) in tables.iter().enumerate() {
            check_identifier(&t.name)?;
            let reserved = t.name.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("temp_"))
                || scratch_name(&t.name).eq_ignore_ascii_case(MATCHED);
            if reserved {
                return invalid(format!("table name {} collides with population scratch tables", t.name));
            }
            if by_name.insert(t.name.clone(), i).is_some() {
                return invalid(format!("duplicate table {}", t.name));
            }
            let mut seen = HashSet::new();
            for c in &t.columns {
                check_identifier(&c.name)?;
                if c.name.eq_ignore_ascii_case("rowid") {
                    return invalid(format!("{}: column name rowid is reserved", t.name));
                }
                if !seen.insert(c.name.as_str()) {
                    return invalid(format!("duplicate column {}.{}", t.name, c.name));
                }
            }
            match t.columns.get(CONTAINER_ID_ORDINAL).map(ColumnMeta::source) {
                Some(ColumnSource::ContainerId) => {}
                _ => return invalid(format!("{}: ordinal 1 must be the container-id column", t.name)),
            }
            let bits = t.cursor.bits();
            if !(1..=32).contains(&bits) {
                return invalid(format!("{}: identity width {bits} outside 1..=32", t.name));
            }
        }

        let roots: Vec<usize> = (0..tables.len()).filter(|i| tables[*i].parent.is_none()).collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => return invalid("no root table".into()),
            _ => return invalid("more than one root table".into()),
        };
        if !matches!(tables[root].cursor, CursorKind::Records { .. }) {
            return invalid(format!("root {} must iterate records", tables[root].name));
        }

        for t in &tables {
            let Some(link) = &t.parent else { continue };
            let Some(&parent) = by_name.get(&link.parent_name) else {
                return invalid(format!("{}: unknown parent {}", t.name, link.parent_name));
            };
            if !matches!(t.cursor, CursorKind::Elements { .. }) {
                return invalid(format!("{}: detail tables must iterate elements", t.name));
            }
            if t.column(&link.foreign_key).is_none() {
                return invalid(format!("{}: foreign key {} not declared", t.name, link.foreign_key));
            }
            if tables[parent].column(&link.primary_key).is_none() {
                return invalid(format!(
                    "{}: primary key {}.{} not declared",
                    t.name, link.parent_name, link.primary_key
                ));
            }
            // Every chain must reach the root within tables.len() hops.
            let mut hops = 0;
            let mut current = t;
            while let Some(link) = &current.parent {
                hops += 1;
                if hops > tables.len() {
                    return invalid(format!("{}: parent chain has a cycle", t.name));
                }
                current = &tables[by_name[&link.parent_name]];
            }
        }

        Ok(Self { tables, by_name, root })
    }

    pub fn root(&self) -> &TableMeta {
        &self.tables[self.root]
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(TableMeta::name)
    }

    pub fn get(&self, name: &str) -> Option<&TableMeta> {
        self.by_name.get(name).map(|i| &self.tables[*i])
    }

    /// Looks up a table, failing with [`VdbError::UnknownTable`].
    pub fn table(&self, name: &str) -> Result<&TableMeta> {
        self.get(name).ok_or_else(|| VdbError::UnknownTable(name.to_string()))
    }

    /// Declaration position of a table; used to order siblings.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn parent_of(&self, table: &TableMeta) -> Option<&TableMeta> {
        table.parent_name().and_then(|p| self.get(p))
    }

    /// `table` followed by its ancestors up to and including the root.
    pub fn lineage<'s>(&'s self, table: &'s TableMeta) -> Vec<&'s TableMeta> {
        let mut chain = vec![table];
        let mut current = table;
        while let Some(parent) = self.parent_of(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Table and column listing with descriptions, in declaration order.
    pub fn describe(&self) -> Vec<TableDescription> {
        self.tables
            .iter()
            .map(|t| TableDescription {
                name: t.name.clone(),
                parent: t.parent_name().map(str::to_string),
                columns: t
                    .columns
                    .iter()
                    .map(|c| ColumnDescription {
                        name: c.name.clone(),
                        data_type: c.data_type,
                        description: c.description.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VdbError::InvalidSchema(format!("not a plain identifier: {name:?}")))
    }
}
