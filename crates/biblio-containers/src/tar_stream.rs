//! Members of a (optionally gzip-compressed) tar archive as containers.
//!
//! Opening walks the member headers once, skipping bodies, to learn the
//! member names and apply the sampling predicate. Loads then stream forward
//! through a held archive handle; only a request for a member behind the
//! current position reopens the archive. Sequential passes therefore
//! decompress the archive once.
//!
//! `tar::Archive::entries` borrows its archive, so the walker keeps the
//! decompressed reader instead and wraps a fresh `tar::Archive` around it
//! for each walk, consuming the block padding of the member it stops on.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::debug;

use crate::error::ContainerError;
use crate::payload::PayloadFormat;
use crate::sample::SamplePredicate;
use crate::source::{out_of_range, ContainerId, ContainerSource};

const BLOCK: u64 = 512;

/// Containers backed by the regular members of a tar archive.
pub struct TarContainers {
    path: PathBuf,
    format: PayloadFormat,
    members: Vec<TarMember>,
    walker: Option<MemberWalker>,
}

struct TarMember {
    name: String,
    /// Position among all regular members of the archive, sampled or not.
    ordinal: usize,
}

impl TarContainers {
    /// Indexes the archive at `path`; `.gz`/`.tgz` archives are gunzipped.
    pub fn open(
        path: impl AsRef<Path>,
        format: PayloadFormat,
        sample: Option<SamplePredicate>,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let mut walker = MemberWalker::open(&path)?;
        let mut members = Vec::new();

        walker.walk(|ordinal, name, _body| {
            if sample.as_ref().map_or(true, |accept| accept(name)) {
                members.push(TarMember { name: name.to_string(), ordinal });
            }
            Ok(ControlFlow::<()>::Continue(()))
        })?;
        debug!(
            archive = %path.display(),
            members = walker.ordinal,
            containers = members.len(),
            "Indexed tar archive"
        );

        Ok(Self { path, format, members, walker: None })
    }
}

impl ContainerSource for TarContainers {
    fn len(&self) -> usize {
        self.members.len()
    }

    fn name(&self, id: ContainerId) -> Option<&str> {
        self.members.get(id as usize).map(|m| m.name.as_str())
    }

    fn load(&mut self, id: ContainerId) -> Result<Vec<Value>, ContainerError> {
        let count = self.members.len();
        let member = self.members.get(id as usize).ok_or_else(|| out_of_range(id, count))?;

        let rewind = self.walker.as_ref().map_or(true, |w| w.ordinal > member.ordinal);
        if rewind {
            self.walker = Some(MemberWalker::open(&self.path)?);
        }
        let walker = match self.walker.as_mut() {
            Some(w) => w,
            None => return Err(out_of_range(id, count)),
        };

        let target = member.ordinal;
        let walked = walker.walk(|ordinal, name, body| {
            if ordinal < target {
                return Ok(ControlFlow::Continue(()));
            }
            let mut bytes = Vec::new();
            body.read_to_end(&mut bytes)?;
            Ok(ControlFlow::Break((name.to_string(), bytes)))
        });
        // A failed walk may stop inside a member; the next load starts over.
        let found = walked.map_err(|e| {
            self.walker = None;
            e
        })?;
        match found {
            Some((name, bytes)) => self.format.decode(&name, &bytes),
            None => Err(ContainerError::Truncated { path: self.path.clone(), member: member.name.clone() }),
        }
    }

    fn release(&mut self) {
        self.walker = None;
    }
}

// ─────────────────────────────────────────────
// Header walker
// ─────────────────────────────────────────────

struct MemberWalker {
    path: PathBuf,
    reader: Box<dyn Read + Send>,
    /// Regular members consumed so far.
    ordinal: usize,
}

impl MemberWalker {
    fn open(path: &Path) -> Result<Self, ContainerError> {
        let file = File::open(path).map_err(|e| ContainerError::io(path, e))?;
        let name = path.to_string_lossy();
        let reader: Box<dyn Read + Send> = if name.ends_with(".gz") || name.ends_with(".tgz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self { path: path.to_path_buf(), reader, ordinal: 0 })
    }

    /// Walks forward over the regular members, calling `visit` with each
    /// member's ordinal, name and body. Stops at the end of the archive or
    /// at the first member `visit` breaks on, leaving the reader at the
    /// header that follows it. A breaking `visit` must read the body to the
    /// end.
    fn walk<T>(
        &mut self,
        mut visit: impl FnMut(usize, &str, &mut dyn Read) -> io::Result<ControlFlow<T>>,
    ) -> Result<Option<T>, ContainerError> {
        let path = &self.path;
        let io_err = |e: io::Error| ContainerError::io(path, e);
        let ordinal = &mut self.ordinal;
        let reader = &mut self.reader;

        let stopped = {
            let mut archive = tar::Archive::new(&mut *reader);
            let mut stopped = None;
            for entry in archive.entries().map_err(io_err)? {
                let mut entry = entry.map_err(io_err)?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let current = *ordinal;
                *ordinal += 1;
                let name = entry.path().map_err(io_err)?.to_string_lossy().into_owned();
                let size = entry.size();
                if let ControlFlow::Break(value) = visit(current, &name, &mut entry).map_err(io_err)? {
                    stopped = Some((value, size));
                    break;
                }
            }
            stopped
        };

        match stopped {
            Some((value, size)) => {
                let padding = (BLOCK - (size % BLOCK)) % BLOCK;
                io::copy(&mut reader.take(padding), &mut io::sink()).map_err(io_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
