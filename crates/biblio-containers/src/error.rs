use std::path::PathBuf;

use thiserror::Error;

use crate::source::ContainerId;

/// Errors raised while enumerating or decoding containers.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// A file or archive could not be read.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A container id outside the enumerated range was requested.
    #[error("container {id} out of range ({count} containers)")]
    OutOfRange { id: ContainerId, count: usize },

    /// A tar stream ended before the indexed member was reached.
    #[error("archive {} truncated before member '{member}'", path.display())]
    Truncated { path: PathBuf, member: String },

    /// The zip layer rejected the archive or one of its members.
    #[error("zip error in {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// A zip file carried no member the source could use.
    #[error("zip archive {} holds no member ending in '{suffix}'", path.display())]
    EmptyArchive { path: PathBuf, suffix: String },

    /// JSON payload did not parse.
    #[error("malformed JSON in {name}: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON payload parsed but lacked the configured records array.
    #[error("payload of {name} has no records array under key '{key}'")]
    MissingRecords { name: String, key: String },

    /// XML payload did not parse.
    #[error("malformed XML in {name}: {message}")]
    Xml { name: String, message: String },

    /// Delimited text did not parse.
    #[error("malformed CSV in {name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },
}

impl ContainerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn xml(name: &str, err: impl std::fmt::Display) -> Self {
        Self::Xml { name: name.to_string(), message: err.to_string() }
    }
}
