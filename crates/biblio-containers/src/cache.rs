use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::error::ContainerError;
use crate::source::{out_of_range, ContainerId, ContainerSource};

/// Parsed records of one container, shared between the cursors reading it.
pub type Records = Arc<Vec<Value>>;

/// Single-slot cache in front of a [`ContainerSource`].
///
/// One pass over a container is usually driven by several cursors (one per
/// detail table) that all ask for the same container. The slot keeps the
/// most recently loaded container; asking for any other id replaces it.
/// Cursors hold their own `Arc` to the records, so eviction never pulls
/// content out from under a cursor that is still positioned on it.
pub struct ContainerCache {
    source: Box<dyn ContainerSource>,
    slot: Option<(ContainerId, Records)>,
    misses: u64,
}

impl ContainerCache {
    pub fn new(source: impl ContainerSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn ContainerSource>) -> Self {
        Self { source, slot: None, misses: 0 }
    }

    /// Returns the records of container `id`, loading them on a miss.
    pub fn get(&mut self, id: ContainerId) -> Result<Records, ContainerError> {
        if let Some((cached, records)) = &self.slot {
            if *cached == id {
                return Ok(Arc::clone(records));
            }
        }
        if id as usize >= self.source.len() {
            return Err(out_of_range(id, self.source.len()));
        }

        self.misses += 1;
        // Drop the old slot before decoding the next container.
        self.slot = None;
        let records = Arc::new(self.source.load(id)?);
        trace!(container = id, records = records.len(), misses = self.misses, "Container cache miss");
        self.slot = Some((id, Arc::clone(&records)));
        Ok(records)
    }

    /// Number of loads performed so far.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn name(&self, id: ContainerId) -> Option<&str> {
        self.source.name(id)
    }

    /// Empties the slot and lets the source release its handles.
    pub fn clear(&mut self) {
        self.slot = None;
        self.source.release();
    }
}
