use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use zip::ZipArchive;

use crate::error::ContainerError;
use crate::payload::PayloadFormat;
use crate::sample::SamplePredicate;
use crate::source::{out_of_range, ContainerId, ContainerSource};

/// Members of a zip archive whose names end with a suffix, one container
/// each, in archive order.
pub struct ZipContainers {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    /// (member name, index in the archive directory)
    members: Vec<(String, usize)>,
    format: PayloadFormat,
}

impl ZipContainers {
    pub fn open(
        path: impl AsRef<Path>,
        suffix: &str,
        format: PayloadFormat,
        sample: Option<SamplePredicate>,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ContainerError::io(&path, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|source| ContainerError::Zip { path: path.clone(), source })?;

        let mut members = Vec::new();
        for index in 0..archive.len() {
            let member = archive
                .by_index_raw(index)
                .map_err(|source| ContainerError::Zip { path: path.clone(), source })?;
            if member.is_dir() || !member.name().ends_with(suffix) {
                continue;
            }
            let name = member.name().to_string();
            if sample.as_ref().map_or(true, |accept| accept(&name)) {
                members.push((name, index));
            }
        }
        debug!(archive = %path.display(), containers = members.len(), "Indexed zip archive");

        Ok(Self { path, archive, members, format })
    }
}

impl ContainerSource for ZipContainers {
    fn len(&self) -> usize {
        self.members.len()
    }

    fn name(&self, id: ContainerId) -> Option<&str> {
        self.members.get(id as usize).map(|(name, _)| name.as_str())
    }

    fn load(&mut self, id: ContainerId) -> Result<Vec<Value>, ContainerError> {
        let (name, index) = self
            .members
            .get(id as usize)
            .ok_or_else(|| out_of_range(id, self.members.len()))?;
        let mut member = self
            .archive
            .by_index(*index)
            .map_err(|source| ContainerError::Zip { path: self.path.clone(), source })?;
        let mut bytes = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut bytes)
            .map_err(|e| ContainerError::io(&self.path, e))?;
        self.format.decode(name, &bytes)
    }
}
