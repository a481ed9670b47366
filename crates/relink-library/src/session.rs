//! Load sessions.
//!
//! A [`SessionContext`] bundles the collaborators a load needs: the catalog,
//! the shared registry, a loader, the per-type handlers and walkers, and a
//! cancel flag. A [`LoadSession`] drives one load from a root document:
//!
//! 1. load, read and publish the root document
//! 2. link its entity references
//! 3. expand the requested root entities through the [`Expander`]
//! 4. report what resolved, what is missing and what failed
//!
//! Published documents are shared and never modified by a session. The
//! entity links a session resolves travel in its report's [`LinkTable`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use relink_core::{DocumentId, EntityKey, TypeCatalog};
use relink_file::{DataReader, Document, LoadedDocument, ReadIssue};

use crate::config::LoadConfig;
use crate::error::{LoadError, SessionError};
use crate::expander::{ExpandState, Expander};
use crate::handler::HandlerSet;
use crate::lib_reader::{LibReader, LinkTable};
use crate::loader::{CancelToken, DocumentLoader};
use crate::registry::IdentityRegistry;
use crate::walker::WalkerSet;

pub struct SessionContext {
    catalog: Arc<TypeCatalog>,
    registry: Arc<IdentityRegistry>,
    loader: Arc<dyn DocumentLoader>,
    handlers: HandlerSet,
    walkers: WalkerSet,
    cancel: CancelToken,
}

impl SessionContext {
    pub fn new(
        catalog: Arc<TypeCatalog>,
        registry: Arc<IdentityRegistry>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        Self {
            catalog,
            registry,
            loader,
            handlers: HandlerSet::new(),
            walkers: WalkerSet::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerSet) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_walkers(mut self, walkers: WalkerSet) -> Self {
        self.walkers = walkers;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn walkers(&self) -> &WalkerSet {
        &self.walkers
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// The published copy of `id`, loading and publishing it if needed.
    ///
    /// Cancellation is checked around the loader call and before publishing,
    /// so a cancelled document never reaches the registry.
    pub fn load_document(&self, id: &DocumentId) -> Result<Arc<LoadedDocument>, LoadError> {
        if let Some(document) = self.registry.document(id) {
            return Ok(document);
        }
        self.cancel.check(id)?;
        let bytes = self.loader.load(id, &self.cancel)?;
        self.cancel.check(id)?;
        let loaded = self.read_document(id, &bytes)?;
        self.cancel.check(id)?;
        Ok(self.registry.publish(Arc::new(loaded)))
    }

    /// Decode `bytes` and run the data pass of every entity.
    ///
    /// A failing handler is recorded as an issue on the document; only
    /// undecodable bytes and catalog mismatches fail the document.
    pub fn read_document(
        &self,
        id: &DocumentId,
        bytes: &[u8],
    ) -> Result<LoadedDocument, LoadError> {
        let corrupt = |detail: String| LoadError::DocumentCorrupt {
            document: id.clone(),
            detail,
        };
        let document = Document::from_bytes(bytes).map_err(|e| corrupt(e.to_string()))?;
        if document.header.document != *id {
            return Err(corrupt(format!(
                "document declares id '{}'",
                document.header.document
            )));
        }
        let mut reader =
            DataReader::new(&self.catalog, document).map_err(|e| corrupt(e.to_string()))?;

        for entity in reader.entities().to_vec() {
            let Some(struct_id) = reader.block(entity).ok().and_then(|b| b.struct_id()) else {
                continue;
            };
            let handler = self.handlers.handler_for(&self.catalog, struct_id);
            if let Err(e) = handler.read_data(&mut reader, entity) {
                warn!(document = %id, block = %entity, error = %e, "data pass failed");
                reader.note(ReadIssue::Handler {
                    block: entity,
                    detail: e.to_string(),
                });
            }
        }

        let loaded = reader.finish();
        debug!(
            document = %id,
            blocks = loaded.len(),
            entities = loaded.entities().len(),
            issues = loaded.issues().len(),
            "read document"
        );
        Ok(loaded)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("registry", &self.registry)
            .field("handlers", &self.handlers)
            .field("walkers", &self.walkers)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// An entity whose document failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntity {
    pub key: EntityKey,
    pub reason: String,
}

/// A soft issue recorded while reading a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentIssue {
    pub document: DocumentId,
    pub issue: String,
}

/// Outcome of a load session.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub root: DocumentId,
    /// Documents loaded by this session, in load order.
    pub loaded: Vec<DocumentId>,
    pub resolved: Vec<EntityKey>,
    /// Excluded entities and entities absent from their loaded document.
    pub missing: Vec<EntityKey>,
    pub failed: Vec<FailedEntity>,
    /// Referenced entities whose document was never loaded.
    pub pending: Vec<EntityKey>,
    pub issues: Vec<DocumentIssue>,
    /// Entity links resolved by this session.
    #[serde(skip)]
    pub links: LinkTable,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty() && self.pending.is_empty()
    }
}

pub struct LoadSession<'s> {
    context: &'s SessionContext,
    config: LoadConfig,
}

impl<'s> LoadSession<'s> {
    pub fn new(context: &'s SessionContext, config: LoadConfig) -> Self {
        Self { context, config }
    }

    /// Load `root` and whatever its entities reach.
    ///
    /// Fails only when the root document cannot be loaded or the session is
    /// cancelled; everything else ends up in the report.
    pub fn load(&self, root: &DocumentId) -> Result<LoadReport, SessionError> {
        let context = self.context;
        let mut lib = LibReader::new(Arc::clone(context.registry()));
        for key in self.config.excluded_keys(root) {
            lib.exclude(key);
        }

        let preloaded = context.registry().is_loaded(root);
        let document = context.load_document(root).map_err(|source| {
            if source.is_cancelled() {
                SessionError::Cancelled
            } else {
                SessionError::Root {
                    document: root.clone(),
                    source,
                }
            }
        })?;

        let mut expander = Expander::new(context)
            .max_documents(self.config.max_documents)
            .follow_references(self.config.expand);
        if !preloaded {
            expander.note_loaded(root.clone());
        }
        lib.link_document(&document, context.catalog())?;

        let names: Vec<String> = match &self.config.entities {
            Some(names) => names.clone(),
            None => document
                .entities()
                .iter()
                .filter_map(|&handle| document.entity_name(handle).map(str::to_string))
                .collect(),
        };
        for name in names {
            expander.expand(EntityKey::new(name, root.clone()));
        }
        expander.run(&mut lib)?;
        lib.retry_pending();

        let report = self.report(root, &expander, lib);
        info!(
            root = %root,
            documents = report.loaded.len(),
            resolved = report.resolved.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "load session finished"
        );
        Ok(report)
    }

    fn report(&self, root: &DocumentId, expander: &Expander<'_>, lib: LibReader) -> LoadReport {
        let mut resolved = BTreeSet::new();
        let mut missing: BTreeSet<EntityKey> = lib.missing().cloned().collect();
        let mut failed = Vec::new();
        for (key, state) in expander.states() {
            match state {
                ExpandState::Resolved => {
                    resolved.insert(key.clone());
                }
                ExpandState::Missing => {
                    missing.insert(key.clone());
                }
                ExpandState::Failed => {
                    let reason = expander.failure(&key.document).map_or_else(
                        || "document failed to load".to_string(),
                        ToString::to_string,
                    );
                    failed.push(FailedEntity {
                        key: key.clone(),
                        reason,
                    });
                }
                _ => {}
            }
        }
        failed.sort_by(|a, b| a.key.cmp(&b.key));
        for entry in &failed {
            missing.remove(&entry.key);
        }

        let pending: BTreeSet<EntityKey> =
            lib.pending().iter().map(|p| p.key.clone()).collect();

        let mut issues = Vec::new();
        for id in expander.loaded() {
            let Some(document) = self.context.registry().document(id) else {
                continue;
            };
            issues.extend(document.issues().iter().map(|issue| DocumentIssue {
                document: id.clone(),
                issue: issue.to_string(),
            }));
        }

        LoadReport {
            root: root.clone(),
            loaded: expander.loaded().to_vec(),
            resolved: resolved.into_iter().collect(),
            missing: missing.into_iter().collect(),
            failed,
            pending: pending.into_iter().collect(),
            issues,
            links: lib.into_links(),
        }
    }
}
