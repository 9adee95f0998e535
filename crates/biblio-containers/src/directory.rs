use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::ContainerError;
use crate::payload::{read_file, PayloadFormat};
use crate::sample::SamplePredicate;
use crate::source::{out_of_range, ContainerId, ContainerSource};

/// Every regular file in a directory whose name ends with a suffix is one
/// container, ordered by file name.
///
/// Files ending in `.gz` are gunzipped. Files ending in `.zip` contribute
/// their first member whose name ends with `member_suffix` (by default the
/// first regular member), the layout of weekly patent-grant bundles.
pub struct DirectoryContainers {
    dir: PathBuf,
    files: Vec<String>,
    format: PayloadFormat,
    member_suffix: String,
}

impl DirectoryContainers {
    /// Lists `dir`, keeping files that end with `suffix` and pass `sample`.
    pub fn open(
        dir: impl AsRef<Path>,
        suffix: &str,
        format: PayloadFormat,
        sample: Option<SamplePredicate>,
    ) -> Result<Self, ContainerError> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| ContainerError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ContainerError::io(&dir, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| ContainerError::io(entry.path(), e))?
                .is_file();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_file || !name.ends_with(suffix) {
                continue;
            }
            if sample.as_ref().map_or(true, |accept| accept(&name)) {
                files.push(name);
            }
        }
        files.sort();
        debug!(dir = %dir.display(), containers = files.len(), "Listed container directory");

        Ok(Self { dir, files, format, member_suffix: String::new() })
    }

    /// Restricts which member of a `.zip` container file is read.
    pub fn with_member_suffix(mut self, suffix: &str) -> Self {
        self.member_suffix = suffix.to_string();
        self
    }

    fn read_zip_member(&self, path: &Path) -> Result<Vec<u8>, ContainerError> {
        let zip_err = |source| ContainerError::Zip { path: path.to_path_buf(), source };
        let file = File::open(path).map_err(|e| ContainerError::io(path, e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
        for i in 0..archive.len() {
            let mut member = archive.by_index(i).map_err(zip_err)?;
            if member.is_dir() || !member.name().ends_with(self.member_suffix.as_str()) {
                continue;
            }
            let mut bytes = Vec::with_capacity(member.size() as usize);
            member.read_to_end(&mut bytes).map_err(|e| ContainerError::io(path, e))?;
            return Ok(bytes);
        }
        Err(ContainerError::EmptyArchive {
            path: path.to_path_buf(),
            suffix: self.member_suffix.clone(),
        })
    }
}

impl ContainerSource for DirectoryContainers {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn name(&self, id: ContainerId) -> Option<&str> {
        self.files.get(id as usize).map(String::as_str)
    }

    fn load(&mut self, id: ContainerId) -> Result<Vec<Value>, ContainerError> {
        let name = self
            .files
            .get(id as usize)
            .ok_or_else(|| out_of_range(id, self.files.len()))?;
        let path = self.dir.join(name);
        let bytes = if name.ends_with(".zip") {
            self.read_zip_member(&path)?
        } else {
            read_file(&path)?
        };
        self.format.decode(name, &bytes)
    }
}
