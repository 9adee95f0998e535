use serde_json::Value;

use crate::error::ContainerError;

/// Identity of a container: its position among the accepted containers of a
/// source, assigned in enumeration order.
pub type ContainerId = u32;

/// An enumerable collection of containers, each holding a list of records.
///
/// Implementations enumerate eagerly (names only) and decode lazily: `load`
/// is the only method that decompresses or parses.
pub trait ContainerSource: Send {
    /// Number of accepted containers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cheap identifier of a container (file or member name).
    fn name(&self, id: ContainerId) -> Option<&str>;

    /// Decodes the records of one container.
    fn load(&mut self, id: ContainerId) -> Result<Vec<Value>, ContainerError>;

    /// Releases archive handles held between loads.
    fn release(&mut self) {}
}

pub(crate) fn out_of_range(id: ContainerId, count: usize) -> ContainerError {
    ContainerError::OutOfRange { id, count }
}
