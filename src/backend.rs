//! Hook for turning symbolic data blocks into real buffers

use crate::data::{Data, DataId};
use crate::error::Result;
use log::debug;

/// Called once per data block when a build context is compiled.
///
/// The simulator never reads or writes through the backend; it only lets the
/// backend allocate whatever it needs for later execution.
pub trait ExecutionBackend {
    fn materialize(&mut self, data: &Data) -> Result<()>;
}

/// Backend that allocates nothing and records what it was asked for.
#[derive(Debug, Default)]
pub struct SymbolicBackend {
    materialized: Vec<DataId>,
    bytes: usize,
}

impl SymbolicBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks materialized so far, in call order
    pub fn materialized(&self) -> &[DataId] {
        &self.materialized
    }

    /// Total bytes a real backend would have allocated
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl ExecutionBackend for SymbolicBackend {
    fn materialize(&mut self, data: &Data) -> Result<()> {
        let bytes = data.elements() * data.kind().size_bytes();
        debug!("Materializing '{}' ({} bytes)", data.identifier(), bytes);
        self.materialized.push(data.id());
        self.bytes += bytes;
        Ok(())
    }
}
