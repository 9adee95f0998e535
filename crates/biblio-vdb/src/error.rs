use biblio_containers::{ContainerError, ContainerId};
use thiserror::Error;

/// Broad class of a [`VdbError`], for callers deciding whether to fix the
/// request, skip a container, retry, or report a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request or schema is wrong; nothing was processed.
    Configuration,
    /// A container could not be read or decoded.
    Data,
    /// The storage engine rejected a statement.
    Engine,
    /// A broken internal invariant; a bug rather than a runtime condition.
    Internal,
}

/// Errors returned by the virtual database layer.
#[derive(Debug, Error)]
pub enum VdbError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// A column specification not of the form `table.column` or `table.*`.
    #[error("Invalid column specification: {0}")]
    ColumnSpec(String),

    /// An attached-database specification not of the form `name:path`.
    #[error("Invalid database specification: {0}")]
    AttachSpec(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A container failed to load; fatal for the whole run.
    #[error("container {container} ({name}): {source}")]
    Container {
        container: ContainerId,
        name: String,
        #[source]
        source: ContainerError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Composite identity or cursor bookkeeping went wrong.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl VdbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTable(_)
            | Self::UnknownColumn { .. }
            | Self::ColumnSpec(_)
            | Self::AttachSpec(_)
            | Self::InvalidSchema(_) => ErrorKind::Configuration,
            Self::Container { .. } | Self::Io(_) => ErrorKind::Data,
            Self::Sqlite(_) => ErrorKind::Engine,
            Self::Invariant(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unknown_column(table: &str, column: &str) -> Self {
        Self::UnknownColumn { table: table.to_string(), column: column.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, VdbError>;
