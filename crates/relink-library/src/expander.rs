//! Dependency expansion.
//!
//! Starting from requested entities, the expander loads the documents that
//! own them, walks their outgoing entity references and queues every target
//! it has not seen before. The frontier is an explicit FIFO worklist, and a
//! key is queued only from `Unvisited`, so cyclic reference graphs terminate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use relink_core::{DocumentId, EntityKey};
use relink_file::LoadedDocument;

use crate::error::{LoadError, SessionError};
use crate::lib_reader::LibReader;
use crate::session::SessionContext;

/// Default cap on documents one session may load.
pub const DEFAULT_MAX_DOCUMENTS: usize = 256;

/// Per-entity expansion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpandState {
    Unvisited,
    Queued,
    Loading,
    Resolved,
    /// The owning document could not be loaded.
    Failed,
    /// Excluded from the session, or absent from its loaded document.
    Missing,
}

impl ExpandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExpandState::Resolved | ExpandState::Failed | ExpandState::Missing
        )
    }
}

pub struct Expander<'s> {
    context: &'s SessionContext,
    states: HashMap<EntityKey, ExpandState>,
    worklist: VecDeque<EntityKey>,
    failures: HashMap<DocumentId, LoadError>,
    loaded: Vec<DocumentId>,
    max_documents: usize,
    follow: bool,
}

impl<'s> Expander<'s> {
    pub fn new(context: &'s SessionContext) -> Self {
        Self {
            context,
            states: HashMap::new(),
            worklist: VecDeque::new(),
            failures: HashMap::new(),
            loaded: Vec::new(),
            max_documents: DEFAULT_MAX_DOCUMENTS,
            follow: true,
        }
    }

    pub fn max_documents(mut self, max: usize) -> Self {
        self.max_documents = max;
        self
    }

    /// When off, only explicitly expanded entities are resolved; references
    /// into other documents stay pending.
    pub fn follow_references(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn state(&self, key: &EntityKey) -> ExpandState {
        self.states
            .get(key)
            .copied()
            .unwrap_or(ExpandState::Unvisited)
    }

    /// Queue `key` unless it was seen before. Returns whether it was queued.
    pub fn expand(&mut self, key: EntityKey) -> bool {
        if self.state(&key) != ExpandState::Unvisited {
            return false;
        }
        self.states.insert(key.clone(), ExpandState::Queued);
        self.worklist.push_back(key);
        true
    }

    /// Count a document loaded outside the worklist against this session.
    pub fn note_loaded(&mut self, document: DocumentId) {
        if !self.loaded.contains(&document) {
            self.loaded.push(document);
        }
    }

    /// Drain the worklist.
    ///
    /// Only cancellation aborts; a document that fails to load fails its
    /// entities and the walk goes on with the rest.
    pub fn run(&mut self, lib: &mut LibReader) -> Result<(), SessionError> {
        while let Some(key) = self.worklist.pop_front() {
            if self.context.cancel().is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if lib.is_excluded(&key) {
                self.states.insert(key, ExpandState::Missing);
                continue;
            }
            if self.failures.contains_key(&key.document) {
                self.states.insert(key, ExpandState::Failed);
                continue;
            }

            self.states.insert(key.clone(), ExpandState::Loading);
            let document = match self.ensure_document(&key.document, lib) {
                Ok(document) => document,
                Err(e) if e.is_cancelled() => return Err(SessionError::Cancelled),
                Err(e) => {
                    warn!(entity = %key, error = %e, "document failed to load");
                    lib.abandon(&key.document);
                    self.failures.insert(key.document.clone(), e);
                    self.states.insert(key, ExpandState::Failed);
                    continue;
                }
            };

            let Some(handle) = self.context.registry().lookup(&key) else {
                debug!(entity = %key, "entity absent from its document");
                self.states.insert(key, ExpandState::Missing);
                continue;
            };
            self.states.insert(key.clone(), ExpandState::Resolved);
            if !self.follow {
                continue;
            }

            let catalog = self.context.catalog();
            match self.context.walkers().references(&document, catalog, handle.block) {
                Ok(references) => {
                    for reference in references {
                        self.expand(reference);
                    }
                }
                Err(e) => warn!(entity = %key, error = %e, "could not walk entity references"),
            }
        }
        Ok(())
    }

    pub fn states(&self) -> impl Iterator<Item = (&EntityKey, ExpandState)> {
        self.states.iter().map(|(key, state)| (key, *state))
    }

    pub fn failure(&self, document: &DocumentId) -> Option<&LoadError> {
        self.failures.get(document)
    }

    /// Documents loaded by this session, in load order.
    pub fn loaded(&self) -> &[DocumentId] {
        &self.loaded
    }

    fn ensure_document(
        &mut self,
        id: &DocumentId,
        lib: &mut LibReader,
    ) -> Result<Arc<LoadedDocument>, LoadError> {
        if let Some(document) = self.context.registry().document(id) {
            return Ok(document);
        }
        if self.loaded.len() >= self.max_documents {
            return Err(LoadError::LimitReached {
                document: id.clone(),
                limit: self.max_documents,
            });
        }
        let document = self.context.load_document(id)?;
        self.note_loaded(id.clone());
        lib.link_document(&document, self.context.catalog())
            .map_err(|e| LoadError::DocumentCorrupt {
                document: id.clone(),
                detail: e.to_string(),
            })?;
        let settled = lib.retry_pending();
        debug!(document = %id, settled, "loaded library document");
        Ok(document)
    }
}

impl std::fmt::Debug for Expander<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expander")
            .field("states", &self.states.len())
            .field("queued", &self.worklist.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}
