//! Column-usage tracing.
//!
//! SQLite calls the authorizer once for every column a statement reads while
//! the statement is *prepared*. Preparing a query with a recording
//! authorizer installed, and never stepping it, yields the exact set of
//! `(table, column)` pairs the query touches without producing a row.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::schema::Schema;
use crate::sql::ROWID;

/// Columns read from each schema table by one statement.
///
/// A table may map to an empty set: the statement referenced it (e.g.
/// `count(*)`) without reading any column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnUsage {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl ColumnUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reference to `table`, and to `column` when given.
    pub fn insert(&mut self, table: &str, column: Option<&str>) {
        let columns = self.tables.entry(table.to_string()).or_default();
        if let Some(column) = column {
            columns.insert(column.to_string());
        }
    }

    pub fn merge(&mut self, other: &ColumnUsage) {
        for (table, columns) in &other.tables {
            self.tables.entry(table.clone()).or_default().extend(columns.iter().cloned());
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Tables of which at least one column is read.
    pub fn tables_with_columns(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(_, columns)| !columns.is_empty())
            .map(|(table, _)| table.as_str())
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str, column: &str) -> bool {
        self.tables.get(table).map_or(false, |c| c.contains(column))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Adds, for every recorded table, the keys joining it to its parent
    /// and so on up to the root. Ancestors are added as tables too.
    pub fn with_join_keys(mut self, schema: &Schema) -> Result<Self> {
        let recorded: Vec<String> = self.tables.keys().cloned().collect();
        for name in recorded {
            let mut table = schema.table(&name)?;
            while let Some(link) = table.parent_link() {
                self.insert(table.name(), Some(&link.foreign_key));
                self.insert(&link.parent_name, Some(&link.primary_key));
                table = schema.table(&link.parent_name)?;
            }
        }
        Ok(self)
    }
}

/// Prepares `sql` on `conn` and records the schema-table columns it reads
/// from the `main` database.
pub fn trace_columns(conn: &Connection, schema: &Schema, sql: &str) -> Result<ColumnUsage> {
    let known: HashSet<String> = schema.table_names().map(str::to_string).collect();
    let usage = Arc::new(Mutex::new(ColumnUsage::new()));
    let sink = Arc::clone(&usage);

    conn.authorizer(Some(move |ctx: AuthContext<'_>| {
        if let AuthAction::Read { table_name, column_name } = ctx.action {
            if ctx.database_name == Some("main") && known.contains(table_name) {
                let column = if column_name.eq_ignore_ascii_case(ROWID) {
                    Some(ROWID)
                } else {
                    Some(column_name).filter(|c| !c.is_empty())
                };
                sink.lock().unwrap_or_else(PoisonError::into_inner).insert(table_name, column);
            }
        }
        Authorization::Allow
    }));
    // Prepared only, never stepped.
    let prepared = conn.prepare(sql).map(drop);

    conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
    prepared?;

    let traced = usage.lock().unwrap_or_else(PoisonError::into_inner).clone();
    debug!(target: "biblio_vdb::sql", sql, tables = traced.tables.len(), "Traced column usage");
    Ok(traced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, TableMeta};

    fn schema() -> Schema {
        Schema::new(vec![
            TableMeta::new("works").columns(vec![
                ColumnMeta::rowid("id"),
                ColumnMeta::container_id(),
                ColumnMeta::empty("doi"),
            ]),
            TableMeta::new("work_authors")
                .parent("works", "work_id", "id")
                .elements("author", 8)
                .columns(vec![
                    ColumnMeta::rowid("id"),
                    ColumnMeta::container_id(),
                    ColumnMeta::parent_rowid("work_id"),
                    ColumnMeta::empty("orcid"),
                ]),
            TableMeta::new("author_affiliations")
                .parent("work_authors", "author_id", "id")
                .elements("affiliation", 6)
                .columns(vec![
                    ColumnMeta::rowid("id"),
                    ColumnMeta::container_id(),
                    ColumnMeta::parent_rowid("author_id"),
                    ColumnMeta::empty("name"),
                ]),
        ])
        .unwrap()
    }

    #[test]
    fn join_keys_reach_the_root() {
        let mut usage = ColumnUsage::new();
        usage.insert("author_affiliations", Some("name"));
        let usage = usage.with_join_keys(&schema()).unwrap();

        assert!(usage.contains("author_affiliations", "author_id"));
        assert!(usage.contains("work_authors", "id"));
        assert!(usage.contains("work_authors", "work_id"));
        assert!(usage.contains("works", "id"));
        assert!(!usage.contains("works", "doi"));
    }

    #[test]
    fn empty_column_references_keep_the_table() {
        let mut usage = ColumnUsage::new();
        usage.insert("works", None);
        assert_eq!(usage.tables().collect::<Vec<_>>(), vec!["works"]);
        assert_eq!(usage.tables_with_columns().count(), 0);
    }

    #[test]
    fn traces_plain_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE works(id, container_id, doi);
             CREATE TABLE work_authors(id, container_id, work_id, orcid);",
        )
        .unwrap();
        let usage = trace_columns(
            &conn,
            &schema(),
            "SELECT works.doi FROM works JOIN work_authors ON works.id = work_authors.work_id
             WHERE work_authors.orcid IS NOT NULL AND works.rowid > 0",
        )
        .unwrap();

        assert!(usage.contains("works", "doi"));
        assert!(usage.contains("works", "id"));
        assert!(usage.contains("works", "rowid"));
        assert!(usage.contains("work_authors", "work_id"));
        assert!(usage.contains("work_authors", "orcid"));
        assert!(!usage.contains("work_authors", "id"));
        assert!(usage.columns("author_affiliations").is_none());
    }

    #[test]
    fn traces_subqueries_and_attached_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE works(id, container_id, doi);
             CREATE TABLE work_authors(id, container_id, work_id, orcid);
             ATTACH DATABASE ':memory:' AS input;
             CREATE TABLE input.dois(doi);",
        )
        .unwrap();

        let usage = trace_columns(
            &conn,
            &schema(),
            "SELECT works.doi FROM works WHERE works.id IN (SELECT work_id FROM work_authors)",
        )
        .unwrap();
        assert!(usage.contains("works", "id"));
        assert!(usage.contains("work_authors", "work_id"));

        let usage = trace_columns(
            &conn,
            &schema(),
            "SELECT doi FROM works WHERE doi IN (SELECT doi FROM input.dois WHERE rowid > 0)",
        )
        .unwrap();
        assert!(usage.contains("works", "doi"));
        // Tables of attached databases are not recorded.
        assert_eq!(usage.tables().collect::<Vec<_>>(), vec!["works"]);
    }

    #[test]
    fn hooks_are_removed_afterwards() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE works(id, container_id, doi)").unwrap();
        trace_columns(&conn, &schema(), "SELECT doi FROM works").unwrap();
        conn.execute("INSERT INTO works VALUES (1, 0, 'x')", []).unwrap();
        let n: i64 = conn.query_row("SELECT count(*) FROM works", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 1);
    }
}
