//! Statement builder for the scratch and destination tables.
//!
//! Every identifier spliced into generated SQL comes from a validated
//! [`Schema`](crate::schema::Schema) (table and column names are plain
//! identifiers) or from a [`Projection`], whose columns are checked against
//! their table when added. Identifiers are quoted regardless.

use std::collections::BTreeSet;

use crate::error::{Result, VdbError};
use crate::schema::{ParentLink, TableMeta};

/// Pseudo-column naming a row's composite identity.
pub const ROWID: &str = "rowid";

/// Database name under which population output is attached.
pub const POPULATED_DB: &str = "populated";

/// Database name under which the scratch connection declares virtual tables.
pub const VIRTUAL_DB: &str = "virtual";

/// Scratch table holding the rowids of each satisfying combination.
pub const MATCHED: &str = "temp_matched";

/// Double-quotes an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"db"."name"`, or `"name"` without a database.
pub fn qualified(database: Option<&str>, name: &str) -> String {
    match database {
        Some(db) => format!("{}.{}", quote(db), quote(name)),
        None => quote(name),
    }
}

/// Name of the per-container scratch copy of `table`.
pub fn scratch_name(table: &str) -> String {
    format!("temp_{table}")
}

/// Column of [`MATCHED`] holding the rowid of `table`.
pub fn matched_column(table: &str) -> String {
    format!("{table}_rowid")
}

// ─────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────

/// A validated subset of one table's columns, optionally with its rowid.
#[derive(Debug, Clone)]
pub struct Projection<'s> {
    table: &'s TableMeta,
    rowid: bool,
    ordinals: BTreeSet<usize>,
}

impl<'s> Projection<'s> {
    pub fn new(table: &'s TableMeta) -> Self {
        Self { table, rowid: false, ordinals: BTreeSet::new() }
    }

    /// Every declared column.
    pub fn all(table: &'s TableMeta) -> Self {
        Self { table, rowid: false, ordinals: (0..table.column_list().len()).collect() }
    }

    pub fn table(&self) -> &'s TableMeta {
        self.table
    }

    /// Adds a declared column, or the rowid pseudo-column.
    pub fn add(&mut self, column: &str) -> Result<&mut Self> {
        if column == ROWID {
            self.rowid = true;
            return Ok(self);
        }
        let ordinal = self
            .table
            .column_ordinal(column)
            .ok_or_else(|| VdbError::unknown_column(self.table.name(), column))?;
        self.ordinals.insert(ordinal);
        Ok(self)
    }

    pub fn with_rowid(mut self) -> Self {
        self.rowid = true;
        self
    }

    pub fn contains(&self, column: &str) -> bool {
        if column == ROWID {
            return self.rowid;
        }
        self.table.column_ordinal(column).map_or(false, |o| self.ordinals.contains(&o))
    }

    pub fn is_empty(&self) -> bool {
        !self.rowid && self.ordinals.is_empty()
    }

    /// Column names, rowid first, then declaration order.
    pub fn names(&self) -> Vec<&'s str> {
        let columns = self.table.column_list();
        let mut names = Vec::with_capacity(self.ordinals.len() + 1);
        if self.rowid {
            names.push(ROWID);
        }
        names.extend(self.ordinals.iter().map(|o| columns[*o].name()));
        names
    }

    /// Declared columns only, in declaration order.
    pub fn declared_names(&self) -> Vec<&'s str> {
        let columns = self.table.column_list();
        self.ordinals.iter().map(|o| columns[*o].name()).collect()
    }

    /// Quoted target column list, e.g. for `INSERT INTO t(...)`.
    pub fn column_list(&self) -> String {
        self.names().iter().map(|n| quote(n)).collect::<Vec<_>>().join(", ")
    }

    /// Select list reading from `source`; the rowid pseudo-column is read
    /// unquoted and exposed as a real column named `rowid`.
    pub fn select_list(&self, source: &str) -> String {
        self.names()
            .iter()
            .map(|n| {
                if *n == ROWID {
                    format!("{source}.rowid AS {}", quote(ROWID))
                } else {
                    format!("{source}.{}", quote(n))
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ─────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────

/// `CREATE [TEMP] TABLE target AS SELECT ... FROM source WHERE container = id`.
pub fn create_container_copy(
    temp: bool,
    target: &str,
    source: &str,
    projection: &Projection<'_>,
    container: u32,
) -> String {
    let table = projection.table();
    format!(
        "CREATE {}TABLE {target} AS SELECT {} FROM {source} WHERE {source}.{} = {container}",
        if temp { "TEMP " } else { "" },
        projection.select_list(source),
        quote(table.container_column()),
    )
}

/// Index name and `CREATE INDEX` statement for one column of a scratch table.
pub fn create_index(database: Option<&str>, table: &str, column: &str) -> (String, String) {
    let index = format!("idx_{table}_{column}");
    let sql = format!(
        "CREATE INDEX {} ON {}({})",
        qualified(database, &index),
        quote(table),
        quote(column)
    );
    (index, sql)
}

pub fn drop_index(database: Option<&str>, index: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", qualified(database, index))
}

pub fn drop_table(database: Option<&str>, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(database, table))
}

/// `INSERT INTO populated.t(cols) SELECT cols FROM t WHERE container = id`,
/// with an optional extra predicate.
pub fn insert_from_container(
    projection: &Projection<'_>,
    container: u32,
    predicate: Option<&str>,
) -> String {
    let table = projection.table();
    let source = quote(table.name());
    let mut sql = format!(
        "INSERT INTO {}({}) SELECT {} FROM {source} WHERE {source}.{} = {container}",
        qualified(Some(POPULATED_DB), table.name()),
        projection.column_list(),
        projection.select_list(&source),
        quote(table.container_column()),
    );
    if let Some(predicate) = predicate {
        sql.push_str(" AND ");
        sql.push_str(predicate);
    }
    sql
}

/// Join clause connecting `child` to its parent, both addressed through
/// `name_of` (aliases or scratch names).
pub fn join_on(link: &ParentLink, child: &str, name_of: impl Fn(&str) -> String) -> String {
    format!(
        "INNER JOIN {child_ref} ON {parent_ref}.{pk} = {child_ref}.{fk}",
        child_ref = name_of(child),
        parent_ref = name_of(&link.parent_name),
        pk = quote(&link.primary_key),
        fk = quote(&link.foreign_key),
    )
}

/// `CREATE TEMP TABLE temp_matched AS SELECT <rowid of each table> FROM
/// <scratch copies INNER JOINed parent first> WHERE (condition)`.
///
/// Scratch copies are aliased to the names of the tables they copy so that
/// `condition` can be written against the virtual tables. `order` must start
/// with the root and list every table after its parent.
pub fn create_matched(order: &[&TableMeta], condition: &str) -> Result<String> {
    let Some((root, rest)) = order.split_first() else {
        return Err(VdbError::Invariant("matched join over no tables".into()));
    };
    let select = order
        .iter()
        .map(|t| format!("{}.rowid AS {}", quote(t.name()), quote(&matched_column(t.name()))))
        .collect::<Vec<_>>()
        .join(", ");
    let mut from = format!("{} AS {}", quote(&scratch_name(root.name())), quote(root.name()));
    for table in rest {
        let link = table.parent_link().ok_or_else(|| {
            VdbError::Invariant(format!("{} joined to temp_matched without a parent", table.name()))
        })?;
        from.push_str(&format!(
            " INNER JOIN {} AS {alias} ON {}.{} = {alias}.{}",
            quote(&scratch_name(table.name())),
            quote(&link.parent_name),
            quote(&link.primary_key),
            quote(&link.foreign_key),
            alias = quote(table.name()),
        ));
    }
    Ok(format!("CREATE TEMP TABLE {} AS SELECT {select} FROM {from} WHERE ({condition})", quote(MATCHED)))
}

/// Predicate keeping the rows of the last table of `path` that are reachable
/// from [`MATCHED`]. `path` runs from the nearest table recorded in
/// `temp_matched` down to the populated table, each entry the parent of the
/// next.
pub fn matched_exists(path: &[&TableMeta]) -> Result<String> {
    let (Some((anchor, rest)), Some(target)) = (path.split_first(), path.last()) else {
        return Err(VdbError::Invariant("empty match path".into()));
    };
    let matched = quote(MATCHED);
    let anchor_column = quote(&matched_column(anchor.name()));
    if rest.is_empty() {
        return Ok(format!(
            "EXISTS (SELECT 1 FROM {matched} WHERE {matched}.{anchor_column} = {}.rowid)",
            quote(target.name())
        ));
    }

    let scratch = |name: &str| quote(&scratch_name(name));
    let mut joins = format!(
        "INNER JOIN {a} ON {a}.{} = {matched}.{anchor_column}",
        quote(ROWID),
        a = scratch(anchor.name()),
    );
    for table in rest {
        let link = table.parent_link().ok_or_else(|| {
            VdbError::Invariant(format!("{} on a match path without a parent", table.name()))
        })?;
        joins.push(' ');
        joins.push_str(&join_on(link, table.name(), scratch));
    }
    Ok(format!(
        "EXISTS (SELECT 1 FROM {matched} {joins} WHERE {}.{} = {}.rowid)",
        scratch(target.name()),
        quote(ROWID),
        quote(target.name())
    ))
}
