//! Cursors flattening nested records into rows.
//!
//! A [`RecordsCursor`] walks the top-level records of each container. An
//! [`ElementsCursor`] owns the cursor of its parent table and walks the
//! elements embedded in the parent's current record, advancing the parent
//! whenever its own list runs out. Chaining them mirrors the schema tree, so
//! a grandchild row is reached through a cursor owning a cursor owning a
//! root cursor.
//!
//! ```text
//!  Unfiltered ──filter()──▶ Positioned ──next()*──▶ Exhausted
//!                               ▲                       │
//!                               └────────filter()───────┘
//! ```

use std::sync::Arc;

use biblio_containers::{record, ContainerCache, ContainerId, Records};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{Result, VdbError};
use crate::rowid;
use crate::schema::{ColumnMeta, ColumnSource, CursorKind, MultiExtractor, Schema, TableMeta};

/// Container cache shared by every cursor of one data source.
pub type SharedCache = Arc<Mutex<ContainerCache>>;

/// Restriction passed to [`RecordCursor::filter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPlan {
    /// Only rows of this container.
    pub container: Option<ContainerId>,
    /// Only the row with this composite identity.
    pub rowid: Option<i64>,
}

impl ScanPlan {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn container(container: ContainerId) -> Self {
        Self { container: Some(container), rowid: None }
    }

    pub fn row(container: ContainerId, rowid: i64) -> Self {
        Self { container: Some(container), rowid: Some(rowid) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unfiltered,
    Positioned,
    Exhausted,
}

/// Row iteration over one table of the tree.
///
/// `rowid`, `container` and `current` are meaningful only while
/// [`state`](RecordCursor::state) is `Positioned`.
pub trait RecordCursor {
    /// (Re)starts iteration under `plan`, positioning on the first row.
    fn filter(&mut self, plan: ScanPlan) -> Result<()>;

    fn next(&mut self) -> Result<()>;

    fn state(&self) -> CursorState;

    fn eof(&self) -> bool {
        self.state() != CursorState::Positioned
    }

    /// Composite identity of the current row.
    fn rowid(&self) -> i64;

    fn container(&self) -> ContainerId;

    /// The record (or embedded element) of the current row.
    fn current(&self) -> Option<&Value>;

    fn parent(&self) -> Option<&dyn RecordCursor>;

    /// Drops held container content, here and up the chain.
    fn close(&mut self);
}

/// Builds the cursor chain for `table`, from the root down.
pub fn open_cursor(
    schema: &Schema,
    table: &TableMeta,
    cache: &SharedCache,
) -> Result<Box<dyn RecordCursor>> {
    match table.cursor_kind() {
        CursorKind::Records { bits } => Ok(Box::new(RecordsCursor::new(Arc::clone(cache), *bits))),
        CursorKind::Elements { path, bits } => {
            let parent_table = schema
                .parent_of(table)
                .ok_or_else(|| VdbError::InvalidSchema(format!("{} has no parent", table.name())))?;
            let parent = open_cursor(schema, parent_table, cache)?;
            let selector = match table.multi_extractor() {
                Some(select) => Selector::Custom(Arc::clone(select)),
                None => Selector::Path(path.clone()),
            };
            Ok(Box::new(ElementsCursor::new(parent, selector, *bits)))
        }
    }
}

/// Value of `column` for the row `cursor` is positioned on.
pub fn column_value(cursor: &dyn RecordCursor, column: &ColumnMeta) -> Result<SqlValue> {
    if cursor.eof() {
        return Err(VdbError::Invariant(format!("column {} read off a row", column.name())));
    }
    Ok(match column.source() {
        ColumnSource::Rowid => SqlValue::Integer(cursor.rowid()),
        ColumnSource::ContainerId => SqlValue::Integer(i64::from(cursor.container())),
        ColumnSource::ParentRowid => match cursor.parent() {
            Some(parent) => SqlValue::Integer(parent.rowid()),
            None => {
                return Err(VdbError::Invariant(format!(
                    "{} read on a root cursor",
                    column.name()
                )))
            }
        },
        ColumnSource::Extract(extract) => match cursor.current() {
            Some(record) => extract(record),
            None => {
                return Err(VdbError::Invariant(format!(
                    "row {} has no record in the cached container",
                    cursor.rowid()
                )))
            }
        },
        ColumnSource::Empty => SqlValue::Null,
    })
}

// ─────────────────────────────────────────────
// Root cursor
// ─────────────────────────────────────────────

/// Iterates containers, then the top-level records of each.
pub struct RecordsCursor {
    cache: SharedCache,
    bits: u32,
    state: CursorState,
    /// Restriction from the last filter.
    only: Option<ContainerId>,
    single_row: bool,
    container: ContainerId,
    records: Option<Records>,
    item: usize,
    rowid: i64,
}

impl RecordsCursor {
    pub fn new(cache: SharedCache, bits: u32) -> Self {
        Self {
            cache,
            bits,
            state: CursorState::Unfiltered,
            only: None,
            single_row: false,
            container: 0,
            records: None,
            item: 0,
            rowid: 0,
        }
    }

    fn load(&self, container: ContainerId) -> Result<Records> {
        let mut cache = self.cache.lock();
        let loaded = cache.get(container);
        match loaded {
            Ok(records) => Ok(records),
            Err(source) => Err(VdbError::Container {
                container,
                name: cache.name(container).unwrap_or_default().to_string(),
                source,
            }),
        }
    }

    fn container_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Positions on the first row at or after (`container`, `item`) allowed
    /// by the current restriction.
    fn seek(&mut self, mut container: ContainerId, mut item: usize) -> Result<()> {
        let count = self.container_count();
        loop {
            let allowed = self.only.map_or(true, |only| only == container);
            if !allowed || container as usize >= count {
                self.exhaust();
                return Ok(());
            }
            if self.records.is_none() || self.container != container {
                self.records = Some(self.load(container)?);
                self.container = container;
            }
            let len = self.records.as_ref().map_or(0, |r| r.len());
            if item < len {
                self.item = item;
                self.rowid = rowid::compose(i64::from(container), item, self.bits)?;
                self.state = CursorState::Positioned;
                return Ok(());
            }
            if self.only.is_some() {
                self.exhaust();
                return Ok(());
            }
            container += 1;
            item = 0;
        }
    }

    fn exhaust(&mut self) {
        self.state = CursorState::Exhausted;
        self.records = None;
    }
}

impl RecordCursor for RecordsCursor {
    fn filter(&mut self, plan: ScanPlan) -> Result<()> {
        self.single_row = false;
        self.only = plan.container;
        match plan.rowid {
            Some(rowid) => {
                let (container, item) = rowid::decompose(rowid, self.bits);
                match u32::try_from(container) {
                    Ok(c) if plan.container.map_or(true, |only| only == c) => {
                        self.only = Some(c);
                        self.single_row = true;
                        self.seek(c, item)
                    }
                    _ => {
                        self.exhaust();
                        Ok(())
                    }
                }
            }
            None => self.seek(plan.container.unwrap_or(0), 0),
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.state != CursorState::Positioned || self.single_row {
            self.exhaust();
            return Ok(());
        }
        self.seek(self.container, self.item + 1)
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn rowid(&self) -> i64 {
        self.rowid
    }

    fn container(&self) -> ContainerId {
        self.container
    }

    fn current(&self) -> Option<&Value> {
        match self.state {
            CursorState::Positioned => self.records.as_ref().and_then(|r| r.get(self.item)),
            _ => None,
        }
    }

    fn parent(&self) -> Option<&dyn RecordCursor> {
        None
    }

    fn close(&mut self) {
        self.records = None;
        self.state = CursorState::Unfiltered;
    }
}

// ─────────────────────────────────────────────
// Nested cursor
// ─────────────────────────────────────────────

/// How an [`ElementsCursor`] finds its elements in the parent record.
pub enum Selector {
    /// Dotted key path, see [`record::elements_at`].
    Path(Vec<String>),
    Custom(MultiExtractor),
}

impl Selector {
    fn select<'v>(&self, record: &'v Value) -> &'v [Value] {
        match self {
            Selector::Path(path) => record::elements_at(record, path),
            Selector::Custom(select) => select(record),
        }
    }
}

/// Iterates elements embedded in the parent cursor's current record.
pub struct ElementsCursor {
    parent: Box<dyn RecordCursor>,
    selector: Selector,
    bits: u32,
    state: CursorState,
    single_row: bool,
    index: usize,
    rowid: i64,
}

impl ElementsCursor {
    pub fn new(parent: Box<dyn RecordCursor>, selector: Selector, bits: u32) -> Self {
        Self {
            parent,
            selector,
            bits,
            state: CursorState::Unfiltered,
            single_row: false,
            index: 0,
            rowid: 0,
        }
    }

    fn elements(&self) -> &[Value] {
        match self.parent.current() {
            Some(record) => self.selector.select(record),
            None => &[],
        }
    }

    /// Positions on element `index` of the parent's current record, moving
    /// the parent forward past records without (enough) elements.
    fn settle(&mut self, mut index: usize) -> Result<()> {
        loop {
            if self.parent.eof() {
                self.state = CursorState::Exhausted;
                return Ok(());
            }
            if index < self.elements().len() {
                self.index = index;
                self.rowid = rowid::compose(self.parent.rowid(), index, self.bits)?;
                self.state = CursorState::Positioned;
                return Ok(());
            }
            if self.single_row {
                self.state = CursorState::Exhausted;
                return Ok(());
            }
            self.parent.next()?;
            index = 0;
        }
    }
}

impl RecordCursor for ElementsCursor {
    fn filter(&mut self, plan: ScanPlan) -> Result<()> {
        match plan.rowid {
            Some(rowid) => {
                let (parent_rowid, index) = rowid::decompose(rowid, self.bits);
                self.single_row = true;
                self.parent.filter(ScanPlan { container: plan.container, rowid: Some(parent_rowid) })?;
                self.settle(index)
            }
            None => {
                self.single_row = false;
                self.parent.filter(plan)?;
                self.settle(0)
            }
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.state != CursorState::Positioned || self.single_row {
            self.state = CursorState::Exhausted;
            return Ok(());
        }
        self.settle(self.index + 1)
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn rowid(&self) -> i64 {
        self.rowid
    }

    fn container(&self) -> ContainerId {
        self.parent.container()
    }

    fn current(&self) -> Option<&Value> {
        match self.state {
            CursorState::Positioned => self.elements().get(self.index),
            _ => None,
        }
    }

    fn parent(&self) -> Option<&dyn RecordCursor> {
        Some(self.parent.as_ref())
    }

    fn close(&mut self) {
        self.state = CursorState::Unfiltered;
        self.parent.close();
    }
}
