//! Process-wide identity registry.
//!
//! Maps `(entity name, owning document)` to the live handle of a published
//! entity and keeps the published documents alive. Every publication of a
//! document gets a fresh generation, so a handle taken before an unload (or
//! a reload) is recognised as stale instead of pointing at the wrong data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use relink_core::{BlockHandle, DocumentId, EntityHandle, EntityKey};
use relink_file::LoadedDocument;

struct Publication {
    generation: u64,
    document: Arc<LoadedDocument>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<EntityKey, EntityHandle>,
    documents: HashMap<DocumentId, Publication>,
    next_generation: u64,
}

/// Shared between sessions; every operation takes the lock once.
#[derive(Default)]
pub struct IdentityRegistry {
    state: RwLock<RegistryState>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every local entity of `document` in one critical section.
    ///
    /// If another session already published the same document id, that copy
    /// stays and is returned; `document` is dropped.
    pub fn publish(&self, document: Arc<LoadedDocument>) -> Arc<LoadedDocument> {
        let mut state = self.state.write();
        let id = document.id().clone();
        if let Some(existing) = state.documents.get(&id) {
            warn!(document = %id, "document already published, discarding late copy");
            return Arc::clone(&existing.document);
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let mut published = 0usize;
        for &block in document.entities() {
            let Some(name) = document.entity_name(block) else {
                continue;
            };
            let key = EntityKey::new(name, id.clone());
            let handle = EntityHandle {
                document: id.clone(),
                generation,
                block,
            };
            if state.entries.insert(key, handle).is_none() {
                published += 1;
            }
        }
        state.documents.insert(
            id.clone(),
            Publication {
                generation,
                document: Arc::clone(&document),
            },
        );
        debug!(document = %id, generation, entities = published, "published document");
        document
    }

    /// Remove a document and exactly its own entries.
    pub fn unload(&self, document: &DocumentId) -> bool {
        let mut state = self.state.write();
        if state.documents.remove(document).is_none() {
            return false;
        }
        state.entries.retain(|key, _| &key.document != document);
        debug!(document = %document, "unloaded document");
        true
    }

    pub fn lookup(&self, key: &EntityKey) -> Option<EntityHandle> {
        self.state.read().entries.get(key).cloned()
    }

    pub fn document(&self, id: &DocumentId) -> Option<Arc<LoadedDocument>> {
        self.state
            .read()
            .documents
            .get(id)
            .map(|p| Arc::clone(&p.document))
    }

    pub fn is_loaded(&self, id: &DocumentId) -> bool {
        self.state.read().documents.contains_key(id)
    }

    pub fn generation(&self, id: &DocumentId) -> Option<u64> {
        self.state.read().documents.get(id).map(|p| p.generation)
    }

    /// Dereference a handle; `None` when its publication is gone.
    pub fn resolve(&self, handle: &EntityHandle) -> Option<(Arc<LoadedDocument>, BlockHandle)> {
        let state = self.state.read();
        let publication = state.documents.get(&handle.document)?;
        if publication.generation != handle.generation {
            return None;
        }
        Some((Arc::clone(&publication.document), handle.block))
    }

    pub fn is_stale(&self, handle: &EntityHandle) -> bool {
        self.generation(&handle.document) != Some(handle.generation)
    }

    /// Loaded document ids, sorted.
    pub fn documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.state.read().documents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of published entities.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("IdentityRegistry")
            .field("documents", &state.documents.len())
            .field("entities", &state.entries.len())
            .finish()
    }
}
