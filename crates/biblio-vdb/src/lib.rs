//! # biblio-vdb
//!
//! Streaming relational access to compressed bibliographic corpora.
//!
//! A [`Schema`] describes a tree of tables: a root table with one row per
//! top-level record of a container, and detail tables with one row per
//! element embedded in the parent's record (authors of a work, affiliations
//! of an author, ...). Every table is exposed to SQLite as a read-only
//! virtual table whose cursor decodes containers lazily, one at a time, so
//! a corpus is never held in memory as a whole.
//!
//! On top of the virtual tables, a [`DataSource`] runs ad hoc queries
//! (optionally partitioned per container, which turns corpus-wide joins
//! into many small indexed joins) and populates a destination database
//! with selected columns of the rows satisfying a condition.
//!
//! ## Quick start
//!
//! ```no_run
//! use biblio_containers::{DirectoryContainers, PayloadFormat};
//! use biblio_vdb::{extract, ColumnMeta, DataSource, Schema, SourceOptions, TableMeta};
//!
//! let schema = Schema::new(vec![
//!     TableMeta::new("works").columns(vec![
//!         ColumnMeta::rowid("id"),
//!         ColumnMeta::container_id(),
//!         ColumnMeta::new("doi", extract::lowercase("DOI")),
//!     ]),
//!     TableMeta::new("work_authors")
//!         .parent("works", "work_id", "id")
//!         .elements("author", 14)
//!         .columns(vec![
//!             ColumnMeta::rowid("id"),
//!             ColumnMeta::container_id(),
//!             ColumnMeta::parent_rowid("work_id"),
//!             ColumnMeta::new("orcid", extract::path("ORCID")),
//!         ]),
//! ])
//! .unwrap();
//!
//! let source = DirectoryContainers::open("/data/crossref", ".json.gz", PayloadFormat::json_items("items"), None)
//!     .unwrap();
//! let mut db = DataSource::new(schema, source, SourceOptions::default()).unwrap();
//!
//! db.populate(
//!     "orcid-works.db",
//!     Some(&["works.doi", "work_authors.*"]),
//!     Some("work_authors.orcid IS NOT NULL"),
//! )
//! .unwrap();
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod perf;
pub mod rowid;
pub mod schema;
pub mod script;
pub mod selection;
pub mod source;
pub mod sql;
pub mod tracer;
pub mod tsort;
pub mod vtab;

// Re-exports for convenience.
pub use config::{init_tracing, AttachSpec, SourceOptions, VdbConfig};
pub use cursor::{CursorState, RecordCursor, ScanPlan};
pub use error::{ErrorKind, Result, VdbError};
pub use schema::{ColumnMeta, ColumnSource, ColumnType, CursorKind, Schema, TableMeta};
pub use selection::Selection;
pub use source::{ContainerProgress, DataSource, PopulateReport, QueryResult};
pub use tracer::ColumnUsage;
pub use tsort::{tables_transitive_closure, tsort};
