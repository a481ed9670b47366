//! Cross-document identity resolution.
//!
//! Entity pointers hold the token of an entity record: a local entity, or a
//! placeholder naming an entity of another document. The LibReader turns
//! that token into an [`EntityLink`] through the [`IdentityRegistry`] and
//! records the result in its session's [`LinkTable`]. Published documents
//! are never written to, so sessions sharing a registry never see each
//! other's exclusions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use relink_core::{
    Address, BlockHandle, CatalogError, DocumentId, EntityKey, EntityLink, TypeCatalog,
};
use relink_file::{LoadedDocument, ReadError, Slot};

use crate::registry::IdentityRegistry;

/// A reference waiting for its target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReference {
    /// The referring document.
    pub document: DocumentId,
    pub slot: Slot,
    pub token: Address,
    pub key: EntityKey,
}

/// Counts from linking one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub resolved: usize,
    pub pending: usize,
    pub missing: usize,
    pub invalid: usize,
}

/// Entity-pointer resolutions made by one session, by referring document
/// and slot.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: HashMap<DocumentId, BTreeMap<Slot, EntityLink>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, document: &DocumentId, slot: Slot, link: EntityLink) {
        self.links
            .entry(document.clone())
            .or_default()
            .insert(slot, link);
    }

    pub fn get(&self, document: &DocumentId, slot: Slot) -> Option<&EntityLink> {
        self.links.get(document)?.get(&slot)
    }

    /// Link recorded for entity pointer `field` of the first instance in
    /// `handle`. A null pointer reads as [`EntityLink::Null`] without an
    /// entry.
    pub fn entity_link(
        &self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
        handle: BlockHandle,
        field: &str,
    ) -> Result<Option<EntityLink>, ReadError> {
        let (slot, token) = document.entity_slot(catalog, handle, field)?;
        if token.is_null() {
            return Ok(Some(EntityLink::Null));
        }
        Ok(self.get(document.id(), slot).cloned())
    }

    /// Every link recorded for `document`, in slot order.
    pub fn document_links(&self, document: &DocumentId) -> Vec<(Slot, EntityLink)> {
        self.links
            .get(document)
            .map(|links| {
                links
                    .iter()
                    .map(|(slot, link)| (*slot, link.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.links.values().all(BTreeMap::is_empty)
    }
}

pub struct LibReader {
    registry: Arc<IdentityRegistry>,
    excluded: HashSet<EntityKey>,
    cache: HashMap<(DocumentId, Address), EntityLink>,
    pending: Vec<PendingReference>,
    missing: BTreeSet<EntityKey>,
    links: LinkTable,
}

impl LibReader {
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self {
            registry,
            excluded: HashSet::new(),
            cache: HashMap::new(),
            pending: Vec::new(),
            missing: BTreeSet::new(),
            links: LinkTable::new(),
        }
    }

    /// Leave `key` out of this session; references to it resolve missing.
    pub fn exclude(&mut self, key: EntityKey) {
        self.excluded.insert(key);
    }

    pub fn is_excluded(&self, key: &EntityKey) -> bool {
        self.excluded.contains(key)
    }

    /// Resolve the entity pointer `raw` found in `owning`.
    ///
    /// Resolved, missing and invalid results are cached, so asking again
    /// yields the same link. A pending result is not cached and is re-checked
    /// on every call.
    pub fn resolve_entity_reference(
        &mut self,
        owning: &LoadedDocument,
        raw: Address,
    ) -> EntityLink {
        if raw.is_null() {
            return EntityLink::Null;
        }
        let cache_key = (owning.id().clone(), raw);
        if let Some(link) = self.cache.get(&cache_key) {
            return link.clone();
        }
        let link = match owning.entity_target(raw) {
            Some(key) => self.lookup(&key),
            None => EntityLink::Invalid(raw),
        };
        if !matches!(link, EntityLink::Pending(_)) {
            self.cache.insert(cache_key, link.clone());
        }
        link
    }

    /// Resolve and record every entity pointer slot of `document`.
    pub fn link_document(
        &mut self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
    ) -> Result<LinkSummary, CatalogError> {
        let mut summary = LinkSummary::default();
        for (slot, token) in document.entity_slots(catalog)? {
            let link = self.resolve_entity_reference(document, token);
            match &link {
                EntityLink::Resolved(_) => summary.resolved += 1,
                EntityLink::Missing(_) => summary.missing += 1,
                EntityLink::Invalid(_) => summary.invalid += 1,
                EntityLink::Null => {}
                EntityLink::Pending(key) => {
                    summary.pending += 1;
                    self.queue(PendingReference {
                        document: document.id().clone(),
                        slot,
                        token,
                        key: key.clone(),
                    });
                }
            }
            self.links.set(document.id(), slot, link);
        }
        debug!(
            document = %document.id(),
            resolved = summary.resolved,
            pending = summary.pending,
            missing = summary.missing,
            invalid = summary.invalid,
            "linked entity references"
        );
        Ok(summary)
    }

    /// Re-resolve queued references whose target document is now loaded.
    ///
    /// Returns how many left the queue.
    pub fn retry_pending(&mut self) -> usize {
        let queued = std::mem::take(&mut self.pending);
        let before = queued.len();
        for reference in queued {
            if !self.registry.is_loaded(&reference.document) {
                trace!(
                    document = %reference.document,
                    "referring document unloaded, dropping reference"
                );
                continue;
            }
            let link = self.lookup(&reference.key);
            if matches!(link, EntityLink::Pending(_)) {
                self.pending.push(reference);
                continue;
            }
            self.links
                .set(&reference.document, reference.slot, link.clone());
            self.cache
                .insert((reference.document.clone(), reference.token), link);
        }
        before - self.pending.len()
    }

    /// Give up on references into `document`: they become missing.
    pub fn abandon(&mut self, document: &DocumentId) -> usize {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| &r.key.document == document);
        self.pending = kept;
        for reference in &dropped {
            let link = EntityLink::Missing(reference.key.clone());
            self.links
                .set(&reference.document, reference.slot, link.clone());
            self.missing.insert(reference.key.clone());
            self.cache
                .insert((reference.document.clone(), reference.token), link);
        }
        dropped.len()
    }

    pub fn pending(&self) -> &[PendingReference] {
        &self.pending
    }

    /// Entities that resolved missing during this session.
    pub fn missing(&self) -> impl Iterator<Item = &EntityKey> {
        self.missing.iter()
    }

    /// Links recorded so far in this session.
    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn into_links(self) -> LinkTable {
        self.links
    }

    fn queue(&mut self, reference: PendingReference) {
        let queued = self
            .pending
            .iter()
            .any(|p| p.document == reference.document && p.slot == reference.slot);
        if !queued {
            self.pending.push(reference);
        }
    }

    fn lookup(&mut self, key: &EntityKey) -> EntityLink {
        if self.excluded.contains(key) {
            self.missing.insert(key.clone());
            return EntityLink::Missing(key.clone());
        }
        if let Some(handle) = self.registry.lookup(key) {
            return EntityLink::Resolved(handle);
        }
        if self.registry.is_loaded(&key.document) {
            self.missing.insert(key.clone());
            return EntityLink::Missing(key.clone());
        }
        EntityLink::Pending(key.clone())
    }
}

impl std::fmt::Debug for LibReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibReader")
            .field("excluded", &self.excluded.len())
            .field("cached", &self.cache.len())
            .field("pending", &self.pending.len())
            .field("links", &self.links.len())
            .finish()
    }
}
