//! Query and population orchestration.
//!
//! A [`DataSource`] owns a primary in-memory SQLite connection on which
//! every schema table is declared as a virtual table. Ad hoc queries run
//! either directly on it or, partitioned, against per-container concrete
//! copies on a scratch connection. Population copies selected rows into a
//! destination database attached as `populated`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use biblio_containers::{ContainerCache, ContainerId, ContainerSource};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, Level};

use crate::config::{AttachSpec, SourceOptions};
use crate::error::Result;
use crate::perf::Stopwatch;
use crate::schema::{Schema, TableMeta};
use crate::script::run_script;
use crate::selection::Selection;
use crate::sql::{self, quote, Projection, MATCHED, POPULATED_DB, ROWID, VIRTUAL_DB};
use crate::tracer::{self, ColumnUsage};
use crate::tsort::{tables_transitive_closure, tsort};
use crate::vtab::{self, SourceState};

/// Passed to the progress hook after each container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerProgress {
    pub container: ContainerId,
    pub name: String,
    /// Containers finished so far, this one included.
    pub completed: usize,
    pub total: usize,
}

/// Rows of a collected query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Outcome of [`DataSource::populate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    /// Rows inserted per populated table.
    pub rows: BTreeMap<String, u64>,
    pub containers: usize,
    /// Post-population statements that ran successfully.
    pub script_statements: usize,
}

type ProgressHook = Box<dyn FnMut(&ContainerProgress)>;

/// How `populate` selects rows for one run.
enum Plan {
    /// Every row of every requested table.
    Unconditional,
    /// Only the root is involved: the condition filters it directly.
    RootOnly(String),
    /// Scratch copies and `temp_matched` per container.
    Matched { condition: String, conditioned: BTreeSet<String>, usage: ColumnUsage },
}

/// Streaming query engine over one container source.
pub struct DataSource {
    conn: Connection,
    state: Arc<SourceState>,
    options: SourceOptions,
    progress: Option<ProgressHook>,
}

impl DataSource {
    /// Declares every table of `schema` over `source` on a fresh in-memory
    /// connection and attaches the configured databases.
    pub fn new(schema: Schema, source: impl ContainerSource + 'static, options: SourceOptions) -> Result<Self> {
        Self::from_cache(schema, ContainerCache::new(source), options)
    }

    pub fn from_cache(schema: Schema, cache: ContainerCache, options: SourceOptions) -> Result<Self> {
        let schema = Arc::new(schema);
        let state = Arc::new(SourceState::new(Arc::clone(&schema), Arc::new(Mutex::new(cache))));
        let conn = Connection::open_in_memory()?;
        vtab::register(&conn, Arc::clone(&state))?;
        vtab::declare_tables(&conn, None, schema.table_names())?;
        attach_all(&conn, &options.attach)?;
        info!(tables = schema.tables().len(), containers = state.cache.lock().len(), "Data source ready");
        Ok(Self { conn, state, options, progress: None })
    }

    pub fn schema(&self) -> &Schema {
        &self.state.schema
    }

    /// The primary connection, with the virtual tables declared in `main`.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of container loads performed so far.
    pub fn cache_misses(&self) -> u64 {
        self.state.cache.lock().misses()
    }

    pub fn container_count(&self) -> usize {
        self.state.cache.lock().len()
    }

    /// Installs a hook called after each container of a partitioned query
    /// or a population run.
    pub fn set_progress(&mut self, hook: impl FnMut(&ContainerProgress) + 'static) {
        self.progress = Some(Box::new(hook));
    }

    /// The schema-table columns `sql` reads.
    pub fn trace_columns(&self, sql: &str) -> Result<ColumnUsage> {
        self.state.clear_fault();
        tracer::trace_columns(&self.conn, &self.state.schema, sql).map_err(|e| self.state.resolve_vdb(e))
    }

    /// Result column names of `sql`, without running it.
    pub fn query_column_names(&self, sql: &str) -> Result<Vec<String>> {
        self.state.clear_fault();
        let stmt = self.conn.prepare(sql).map_err(|e| self.state.resolve(e))?;
        Ok(stmt.column_names().into_iter().map(str::to_string).collect())
    }

    // ── Queries ───────────────────────────────────────────────

    /// Runs `sql` and hands each row to `on_row` as SQLite produces it;
    /// `ControlFlow::Break` stops early.
    ///
    /// Partitioned execution runs `sql` once per container against concrete
    /// copies holding only that container's rows, so aggregates are computed
    /// per container.
    #[instrument(skip_all, fields(partitioned = partitioned))]
    pub fn query_each<F>(&mut self, sql: &str, partitioned: bool, mut on_row: F) -> Result<()>
    where
        F: FnMut(&Row<'_>) -> Result<ControlFlow<()>>,
    {
        self.state.clear_fault();
        debug!(target: "biblio_vdb::sql", sql, "Query");
        let result = if partitioned {
            self.query_partitioned(sql, &mut on_row)
        } else {
            self.query_direct(sql, &mut on_row)
        };
        self.release_containers();
        result
    }

    /// Runs `sql` and collects every row.
    pub fn query(&mut self, sql: &str, partitioned: bool) -> Result<QueryResult> {
        let columns = self.query_column_names(sql)?;
        let width = columns.len();
        let mut rows = Vec::new();
        self.query_each(sql, partitioned, |row| {
            let values = (0..width).map(|i| row.get::<_, SqlValue>(i)).collect::<rusqlite::Result<Vec<_>>>()?;
            rows.push(values);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(QueryResult { columns, rows })
    }

    fn query_direct(&self, sql: &str, on_row: &mut dyn FnMut(&Row<'_>) -> Result<ControlFlow<()>>) -> Result<()> {
        let state = &self.state;
        let mut stmt = self.conn.prepare(sql).map_err(|e| state.resolve(e))?;
        let mut rows = stmt.query([]).map_err(|e| state.resolve(e))?;
        while let Some(row) = rows.next().map_err(|e| state.resolve(e))? {
            if on_row(row)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn query_partitioned(
        &mut self,
        sql: &str,
        on_row: &mut dyn FnMut(&Row<'_>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let state = Arc::clone(&self.state);
        let schema = &state.schema;
        let usage = tracer::trace_columns(&self.conn, schema, sql)
            .map_err(|e| state.resolve_vdb(e))?
            .with_join_keys(schema)?;
        let mut watch = Stopwatch::start();

        let scratch = Connection::open_in_memory()?;
        vtab::register(&scratch, Arc::clone(&state))?;
        exec(&scratch, &state, &format!("ATTACH DATABASE ':memory:' AS {}", quote(VIRTUAL_DB)))?;
        vtab::declare_tables(&scratch, Some(VIRTUAL_DB), schema.table_names())?;
        attach_all(&scratch, &self.options.attach)?;
        watch.checkpoint("scratch connection ready");

        let total = self.container_count();
        for container in 0..total as ContainerId {
            let mut indexes = Vec::new();
            for name in usage.tables() {
                let table = schema.table(name)?;
                let mut projection = Projection::new(table);
                projection.add(table.container_column())?;
                for column in usage.columns(name).into_iter().flatten() {
                    projection.add(column)?;
                }
                let target = sql::qualified(Some("main"), name);
                let source = sql::qualified(Some(VIRTUAL_DB), name);
                exec(&scratch, &state, &sql::create_container_copy(false, &target, &source, &projection, container))?;
                for column in index_columns(schema, table, &usage) {
                    if projection.contains(&column) {
                        let (index, create) = sql::create_index(Some("main"), name, &column);
                        exec(&scratch, &state, &create)?;
                        indexes.push(index);
                    }
                }
            }
            watch.checkpoint("container copies created");

            let flow = {
                let mut stmt = scratch.prepare(sql).map_err(|e| state.resolve(e))?;
                let mut rows = stmt.query([]).map_err(|e| state.resolve(e))?;
                let mut flow = ControlFlow::Continue(());
                while let Some(row) = rows.next().map_err(|e| state.resolve(e))? {
                    flow = on_row(row)?;
                    if flow.is_break() {
                        break;
                    }
                }
                flow
            };
            watch.checkpoint("partition query done");

            for index in &indexes {
                exec(&scratch, &state, &sql::drop_index(Some("main"), index))?;
            }
            for name in usage.tables() {
                exec(&scratch, &state, &sql::drop_table(Some("main"), name))?;
            }
            self.container_done(container, total);
            if flow.is_break() {
                break;
            }
        }
        Ok(())
    }

    // ── Population ────────────────────────────────────────────

    /// Copies the requested columns (`table.column` / `table.*`, all tables
    /// when `None`) into `destination`, keeping only rows whose ancestors
    /// satisfy `condition`. Existing destination tables of the same names
    /// are replaced.
    #[instrument(skip_all, fields(destination = %destination.as_ref().display()))]
    pub fn populate(
        &mut self,
        destination: impl AsRef<Path>,
        columns: Option<&[&str]>,
        condition: Option<&str>,
    ) -> Result<PopulateReport> {
        self.state.clear_fault();
        let state = Arc::clone(&self.state);
        let schema = &state.schema;
        let selection = Selection::from_option(schema, columns)?;
        let plan = self.plan(&selection, condition)?;

        let path = destination.as_ref().to_string_lossy().into_owned();
        debug!(target: "biblio_vdb::sql", path = %path, "Attaching destination");
        self.conn
            .execute(&format!("ATTACH DATABASE ?1 AS {}", quote(POPULATED_DB)), [&path])
            .map_err(|e| state.resolve(e))?;
        let result = self.populate_attached(&selection, &plan);
        self.release_containers();
        let detached = exec(&self.conn, &state, &format!("DETACH DATABASE {}", quote(POPULATED_DB)));
        let mut report = result?;
        detached?;

        let dest = Connection::open(destination.as_ref())?;
        for table in selection.tables() {
            if let Some(script) = table.script() {
                report.script_statements += run_script(&dest, table.name(), script);
            }
        }
        info!(containers = report.containers, tables = report.rows.len(), "Population finished");
        Ok(report)
    }

    fn plan(&self, selection: &Selection<'_>, condition: Option<&str>) -> Result<Plan> {
        let schema = &self.state.schema;
        let root = schema.root().name();
        let Some(condition) = condition else {
            return Ok(Plan::Unconditional);
        };

        let every_table = schema.table_names().map(quote).collect::<Vec<_>>().join(", ");
        let probe = format!("SELECT DISTINCT 1 FROM {every_table} WHERE {condition}");
        let usage = tracer::trace_columns(&self.conn, schema, &probe).map_err(|e| self.state.resolve_vdb(e))?;
        let conditioned = tables_transitive_closure(
            schema,
            usage.tables_with_columns().chain(std::iter::once(root)),
            root,
        )?;
        debug!(?conditioned, "Condition tables");

        let only_root = conditioned.len() == 1 && selection.tables().all(|t| t.name() == root);
        if only_root {
            Ok(Plan::RootOnly(format!("({condition})")))
        } else {
            Ok(Plan::Matched { condition: condition.to_string(), conditioned, usage })
        }
    }

    fn populate_attached(&mut self, selection: &Selection<'_>, plan: &Plan) -> Result<PopulateReport> {
        let state = Arc::clone(&self.state);
        let schema = &state.schema;
        if self.options.fast_writes {
            let db = quote(POPULATED_DB);
            exec(&self.conn, &state, &format!("PRAGMA {db}.synchronous = OFF; PRAGMA {db}.journal_mode = OFF;"))?;
        }
        for projection in selection.projections() {
            let table = projection.table();
            exec(&self.conn, &state, &sql::drop_table(Some(POPULATED_DB), table.name()))?;
            exec(&self.conn, &state, &table.table_schema(Some(POPULATED_DB), Some(&projection.declared_names()))?)?;
        }

        let scratch_tables = match plan {
            Plan::Matched { conditioned, .. } => {
                let requested = selection.tables().map(TableMeta::name);
                let all = conditioned.iter().map(String::as_str).chain(requested);
                tables_transitive_closure(schema, all, schema.root().name())?
            }
            _ => BTreeSet::new(),
        };

        let mut report = PopulateReport::default();
        let total = self.container_count();
        for container in 0..total as ContainerId {
            let mut watch = Stopwatch::start();
            let tx = self.conn.unchecked_transaction().map_err(|e| state.resolve(e))?;
            match plan {
                Plan::Unconditional => {
                    for projection in selection.projections() {
                        let n = exec_count(&tx, &state, &sql::insert_from_container(projection, container, None))?;
                        *report.rows.entry(projection.table().name().to_string()).or_default() += n;
                    }
                }
                Plan::RootOnly(predicate) => {
                    for projection in selection.projections() {
                        let insert = sql::insert_from_container(projection, container, Some(predicate.as_str()));
                        let n = exec_count(&tx, &state, &insert)?;
                        *report.rows.entry(projection.table().name().to_string()).or_default() += n;
                    }
                }
                Plan::Matched { condition, conditioned, usage } => {
                    let indexes = create_scratch_copies(&tx, &state, &scratch_tables, usage, container)?;
                    watch.checkpoint("scratch copies created");

                    let order = tsort(schema, conditioned.iter().map(String::as_str))?;
                    exec(&tx, &state, &sql::drop_table(Some("temp"), MATCHED))?;
                    exec(&tx, &state, &sql::create_matched(&order, condition)?)?;
                    dump_matched(&tx, schema.root().name(), container);
                    watch.checkpoint("matched rows selected");

                    for projection in selection.projections() {
                        let table = projection.table();
                        let path = match_path(schema, table, conditioned);
                        let predicate = sql::matched_exists(&path)?;
                        let insert = sql::insert_from_container(projection, container, Some(predicate.as_str()));
                        let n = exec_count(&tx, &state, &insert)?;
                        *report.rows.entry(table.name().to_string()).or_default() += n;
                    }
                    watch.checkpoint("tables populated");

                    for index in &indexes {
                        exec(&tx, &state, &sql::drop_index(Some("temp"), index))?;
                    }
                    exec(&tx, &state, &sql::drop_table(Some("temp"), MATCHED))?;
                    for name in &scratch_tables {
                        exec(&tx, &state, &sql::drop_table(Some("temp"), &sql::scratch_name(name)))?;
                    }
                }
            }
            tx.commit().map_err(|e| state.resolve(e))?;
            report.containers += 1;
            self.container_done(container, total);
        }
        Ok(report)
    }

    /// Empties the cache slot and closes archive handles once an operation
    /// no longer has cursors open.
    fn release_containers(&self) {
        self.state.cache.lock().clear();
        trace!("Container handles released");
    }

    fn container_done(&mut self, container: ContainerId, total: usize) {
        let name = self.state.cache.lock().name(container).unwrap_or_default().to_string();
        info!(container, name = %name, "Container processed");
        if let Some(hook) = self.progress.as_mut() {
            hook(&ContainerProgress { container, name, completed: container as usize + 1, total });
        }
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn exec(conn: &Connection, state: &SourceState, sql: &str) -> Result<()> {
    debug!(target: "biblio_vdb::sql", sql, "Execute");
    conn.execute_batch(sql).map_err(|e| state.resolve(e))
}

fn exec_count(conn: &Connection, state: &SourceState, sql: &str) -> Result<u64> {
    debug!(target: "biblio_vdb::sql", sql, "Execute");
    let n = conn.execute(sql, []).map_err(|e| state.resolve(e))?;
    Ok(n as u64)
}

fn attach_all(conn: &Connection, specs: &[AttachSpec]) -> Result<()> {
    for spec in specs {
        let path = spec.path.to_string_lossy();
        debug!(target: "biblio_vdb::sql", name = %spec.name, path = %path, "Attaching database");
        conn.execute(&format!("ATTACH DATABASE ?1 AS {}", quote(&spec.name)), [&*path])?;
    }
    Ok(())
}

/// Key columns of `table` used to join it within the traced set: its own
/// rowid, its foreign key and the primary key its children reference.
fn index_columns(schema: &Schema, table: &TableMeta, usage: &ColumnUsage) -> Vec<String> {
    let mut columns = vec![ROWID.to_string()];
    if let Some(link) = table.parent_link() {
        columns.push(link.foreign_key.clone());
    }
    for child in schema.tables() {
        if let Some(link) = child.parent_link() {
            let traced = usage.columns(child.name()).is_some();
            if link.parent_name == table.name() && traced && !columns.contains(&link.primary_key) {
                columns.push(link.primary_key.clone());
            }
        }
    }
    columns
}

/// Creates the indexed `temp_<table>` copies of one container: rowid,
/// container id, join keys and the columns the condition reads.
fn create_scratch_copies(
    conn: &Connection,
    state: &SourceState,
    tables: &BTreeSet<String>,
    usage: &ColumnUsage,
    container: ContainerId,
) -> Result<Vec<String>> {
    let schema = &state.schema;
    let mut keys = ColumnUsage::new();
    for name in tables {
        keys.insert(name, None);
    }
    let keys = keys.with_join_keys(schema)?;

    let mut indexes = Vec::new();
    for name in tables {
        let table = schema.table(name)?;
        let mut projection = Projection::new(table).with_rowid();
        projection.add(table.container_column())?;
        for column in keys.columns(name).into_iter().flatten() {
            projection.add(column)?;
        }
        for column in usage.columns(name).into_iter().flatten() {
            projection.add(column)?;
        }

        let scratch = sql::scratch_name(name);
        exec(conn, state, &sql::drop_table(Some("temp"), &scratch))?;
        exec(conn, state, &sql::create_container_copy(true, &quote(&scratch), &quote(name), &projection, container))?;
        for column in index_columns(schema, table, &keys) {
            if projection.contains(&column) {
                let (index, create) = sql::create_index(Some("temp"), &scratch, &column);
                exec(conn, state, &create)?;
                indexes.push(index);
            }
        }
    }
    Ok(indexes)
}

/// `table` and its ancestors up to the nearest one recorded in
/// `temp_matched`, top-down.
fn match_path<'s>(schema: &'s Schema, table: &'s TableMeta, conditioned: &BTreeSet<String>) -> Vec<&'s TableMeta> {
    let mut path = Vec::new();
    for ancestor in schema.lineage(table) {
        path.push(ancestor);
        if conditioned.contains(ancestor.name()) {
            break;
        }
    }
    path.reverse();
    path
}

/// Logs the root rows that satisfied the condition in one container.
fn dump_matched(conn: &Connection, root: &str, container: ContainerId) {
    if !tracing::enabled!(target: "biblio_vdb::matched", Level::TRACE) {
        return;
    }
    let sql = format!(
        "SELECT DISTINCT {} FROM {}",
        quote(&sql::matched_column(root)),
        sql::qualified(Some("temp"), MATCHED)
    );
    let rowids = conn.prepare(&sql).and_then(|mut stmt| {
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()
    });
    match rowids {
        Ok(rowids) => trace!(target: "biblio_vdb::matched", container, ?rowids, "Matched root rows"),
        Err(e) => trace!(target: "biblio_vdb::matched", container, error = %e, "Matched rows unavailable"),
    }
}
