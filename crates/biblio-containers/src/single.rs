use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ContainerError;
use crate::payload::{read_file, PayloadFormat};
use crate::source::{out_of_range, ContainerId, ContainerSource};

/// A whole file (or an in-memory payload) as the single implicit partition,
/// container 0. Used for flat sources such as CSV tables.
pub struct SingleContainer {
    name: String,
    origin: Origin,
    format: PayloadFormat,
}

enum Origin {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl SingleContainer {
    /// Reads `path` on demand, gunzipping when it ends in `.gz`.
    pub fn open(path: impl AsRef<Path>, format: PayloadFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, origin: Origin::File(path), format }
    }

    /// Serves an already-read payload.
    pub fn from_bytes(name: &str, bytes: Vec<u8>, format: PayloadFormat) -> Self {
        Self { name: name.to_string(), origin: Origin::Bytes(bytes), format }
    }
}

impl ContainerSource for SingleContainer {
    fn len(&self) -> usize {
        1
    }

    fn name(&self, id: ContainerId) -> Option<&str> {
        (id == 0).then_some(self.name.as_str())
    }

    fn load(&mut self, id: ContainerId) -> Result<Vec<Value>, ContainerError> {
        if id != 0 {
            return Err(out_of_range(id, 1));
        }
        match &self.origin {
            Origin::File(path) => self.format.decode(&self.name, &read_file(path)?),
            Origin::Bytes(bytes) => self.format.decode(&self.name, bytes),
        }
    }
}
