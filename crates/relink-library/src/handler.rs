//! Per-type data pass run on every entity right after its document is read.

use std::collections::HashMap;
use std::sync::Arc;

use relink_core::{BlockHandle, StructId, TypeCatalog};
use relink_file::{DataReader, ReadError};

/// Restores the data an entity owns: local pointers, lists, typed arrays.
pub trait DataHandler: Send + Sync {
    fn read_data(&self, reader: &mut DataReader<'_>, entity: BlockHandle) -> Result<(), ReadError>;
}

/// The catalog-driven pass, [`DataReader::relink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RelinkHandler;

impl DataHandler for RelinkHandler {
    fn read_data(&self, reader: &mut DataReader<'_>, entity: BlockHandle) -> Result<(), ReadError> {
        reader.relink(entity)
    }
}

/// Data handlers by struct name, with a fallback.
#[derive(Clone)]
pub struct HandlerSet {
    fallback: Arc<dyn DataHandler>,
    by_struct: HashMap<String, Arc<dyn DataHandler>>,
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self {
            fallback: Arc::new(RelinkHandler),
            by_struct: HashMap::new(),
        }
    }
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        strukt: impl Into<String>,
        handler: impl DataHandler + 'static,
    ) -> Self {
        self.by_struct.insert(strukt.into(), Arc::new(handler));
        self
    }

    pub fn handler_for(&self, catalog: &TypeCatalog, id: StructId) -> Arc<dyn DataHandler> {
        catalog
            .descriptor(id)
            .ok()
            .and_then(|desc| self.by_struct.get(&desc.name))
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_struct.keys().collect();
        names.sort();
        f.debug_struct("HandlerSet").field("by_struct", &names).finish()
    }
}
