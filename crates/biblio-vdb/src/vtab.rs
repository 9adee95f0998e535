//! SQLite virtual tables backed by container cursors.
//!
//! Each table of the schema is declared with
//! `CREATE VIRTUAL TABLE <name> USING container_stream()`; the module looks
//! the table up in the shared [`SourceState`] by the name SQLite passes in.
//!
//! Index negotiation knows two access paths:
//!
//! | idx bit | constraint                          | argv |
//! |---------|-------------------------------------|------|
//! | `1`     | `container_id = ?`                  | 1    |
//! | `2`     | `rowid = ?` (only together with 1)  | 2    |
//!
//! Everything else is a full scan over all containers.

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use biblio_containers::ContainerId;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::vtab::{
    read_only_module, Context, CreateVTab, IndexConstraintOp, IndexInfo, VTab, VTabConnection,
    VTabCursor, VTabKind, Values,
};
use rusqlite::{ffi, Connection};
use tracing::trace;

use crate::cursor::{column_value, open_cursor, RecordCursor, ScanPlan, SharedCache};
use crate::error::{Result, VdbError};
use crate::schema::{Schema, CONTAINER_ID_ORDINAL};
use crate::sql::qualified;

/// Module name the virtual tables are declared with.
pub const MODULE_NAME: &str = "container_stream";

const CONTAINER_INDEX: c_int = 1;
const ROWID_INDEX: c_int = 2;
const ROWID_COLUMN: c_int = -1;
const FULL_SCAN_COST: f64 = 1e12;

/// State shared by every virtual table and cursor of one data source.
pub struct SourceState {
    pub(crate) schema: Arc<Schema>,
    pub(crate) cache: SharedCache,
    /// Typed error raised inside a callback, kept until the caller sees
    /// SQLite's generic failure.
    fault: Mutex<Option<VdbError>>,
}

impl SourceState {
    pub fn new(schema: Arc<Schema>, cache: SharedCache) -> Self {
        Self { schema, cache, fault: Mutex::new(None) }
    }

    fn record_fault(&self, err: VdbError) -> rusqlite::Error {
        let message = err.to_string();
        *self.fault.lock() = Some(err);
        rusqlite::Error::ModuleError(message)
    }

    /// Replaces an engine error with the typed error that caused it, if any.
    pub(crate) fn resolve(&self, err: rusqlite::Error) -> VdbError {
        self.fault.lock().take().unwrap_or(VdbError::Sqlite(err))
    }

    /// [`resolve`](Self::resolve) for errors already converted.
    pub(crate) fn resolve_vdb(&self, err: VdbError) -> VdbError {
        match err {
            VdbError::Sqlite(e) => self.resolve(e),
            other => other,
        }
    }

    pub(crate) fn clear_fault(&self) {
        self.fault.lock().take();
    }
}

/// Registers the module on `conn`.
pub fn register(conn: &Connection, state: Arc<SourceState>) -> Result<()> {
    conn.create_module(MODULE_NAME, read_only_module::<StreamingTable>(), Some(state))?;
    Ok(())
}

/// Declares one virtual table per schema table in `database`.
pub fn declare_tables<'a>(
    conn: &Connection,
    database: Option<&str>,
    tables: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for table in tables {
        let sql = format!(
            "CREATE VIRTUAL TABLE {} USING {MODULE_NAME}()",
            qualified(database, table)
        );
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────

#[repr(C)]
pub struct StreamingTable {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab,
    state: Arc<SourceState>,
    table: String,
}

unsafe impl<'vtab> VTab<'vtab> for StreamingTable {
    type Aux = Arc<SourceState>;
    type Cursor = StreamingCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&Arc<SourceState>>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let state = aux
            .cloned()
            .ok_or_else(|| rusqlite::Error::ModuleError("module registered without state".into()))?;
        let name = args
            .get(2)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .ok_or_else(|| rusqlite::Error::ModuleError("missing table name".into()))?
            .trim_matches('"')
            .to_string();
        let declaration = match state.schema.get(&name) {
            Some(table) => table.virtual_table_schema(),
            None => return Err(state.record_fault(VdbError::UnknownTable(name))),
        };
        let vtab = StreamingTable { base: ffi::sqlite3_vtab::default(), state, table: name };
        Ok((declaration, vtab))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let mut container = None;
        let mut rowid = None;
        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.is_usable()
                || constraint.operator() != IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ
            {
                continue;
            }
            match constraint.column() {
                c if c == CONTAINER_ID_ORDINAL as c_int => container = Some(i),
                ROWID_COLUMN => rowid = Some(i),
                _ => {}
            }
        }

        let mut idx_num = 0;
        if let Some(i) = container {
            idx_num |= CONTAINER_INDEX;
            let mut usage = info.constraint_usage(i);
            usage.set_argv_index(1);
            usage.set_omit(true);
            if let Some(r) = rowid {
                idx_num |= ROWID_INDEX;
                let mut usage = info.constraint_usage(r);
                usage.set_argv_index(2);
                usage.set_omit(true);
            }
        }

        info.set_idx_num(idx_num);
        if idx_num == 0 {
            info.set_estimated_cost(FULL_SCAN_COST);
        } else {
            info.set_estimated_cost(2000.0 / f64::from(idx_num));
        }
        trace!(table = %self.table, idx_num, "best_index");
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<StreamingCursor<'vtab>> {
        let schema = Arc::clone(&self.state.schema);
        let table = match schema.get(&self.table) {
            Some(table) => table,
            None => return Err(self.state.record_fault(VdbError::UnknownTable(self.table.clone()))),
        };
        let cursor = match open_cursor(&schema, table, &self.state.cache) {
            Ok(cursor) => cursor,
            Err(e) => return Err(self.state.record_fault(e)),
        };
        Ok(StreamingCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            state: Arc::clone(&self.state),
            table: self.table.clone(),
            cursor,
            phantom: PhantomData,
        })
    }
}

impl CreateVTab<'_> for StreamingTable {
    const KIND: VTabKind = VTabKind::Default;
}

// ─────────────────────────────────────────────
// Cursor
// ─────────────────────────────────────────────

#[repr(C)]
pub struct StreamingCursor<'vtab> {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab_cursor,
    state: Arc<SourceState>,
    table: String,
    cursor: Box<dyn RecordCursor>,
    phantom: PhantomData<&'vtab StreamingTable>,
}

impl StreamingCursor<'_> {
    fn check<T>(&self, result: Result<T>) -> rusqlite::Result<T> {
        result.map_err(|e| self.state.record_fault(e))
    }
}

/// Reads an equality argument as a container id; values that cannot be one
/// select nothing.
fn container_arg(value: SqlValue) -> ContainerId {
    match value {
        SqlValue::Integer(i) => ContainerId::try_from(i).unwrap_or(ContainerId::MAX),
        _ => ContainerId::MAX,
    }
}

unsafe impl VTabCursor for StreamingCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        let mut plan = ScanPlan::everything();
        if idx_num & CONTAINER_INDEX != 0 {
            plan.container = Some(container_arg(args.get::<SqlValue>(0)?));
            if idx_num & ROWID_INDEX != 0 {
                plan.rowid = match args.get::<SqlValue>(1)? {
                    SqlValue::Integer(r) => Some(r),
                    _ => Some(-1),
                };
            }
        }
        trace!(table = %self.table, ?plan, "filter");
        let result = self.cursor.filter(plan);
        self.check(result)
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        let result = self.cursor.next();
        self.check(result)
    }

    fn eof(&self) -> bool {
        self.cursor.eof()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let column = self
            .state
            .schema
            .get(&self.table)
            .and_then(|table| table.column_list().get(usize::try_from(i).ok()?));
        let column = self.check(column.ok_or_else(|| {
            VdbError::Invariant(format!("{} has no column {i}", self.table))
        }))?;
        let value = self.check(column_value(self.cursor.as_ref(), column))?;
        ctx.set_result(&value)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.cursor.rowid())
    }
}

impl Drop for StreamingCursor<'_> {
    fn drop(&mut self) {
        self.cursor.close();
    }
}
