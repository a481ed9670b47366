//! Identity of top-level entities and of the documents that own them.

use serde::{Deserialize, Serialize};

use crate::address::{Address, BlockHandle};

/// Identifier of a document, as understood by the document loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId(id)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Linking metadata carried by an entity record.
///
/// `library` is `None` for an entity owned by the document it is written
/// in, and names the owning document for a linked placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    pub library: Option<DocumentId>,
}

impl EntityMeta {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: None,
        }
    }

    pub fn linked(name: impl Into<String>, library: DocumentId) -> Self {
        Self {
            name: name.into(),
            library: Some(library),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.library.is_some()
    }

    /// Registry key of the entity this record stands for, when read from
    /// document `owner`.
    pub fn key_in(&self, owner: &DocumentId) -> EntityKey {
        EntityKey {
            name: self.name.clone(),
            document: self.library.clone().unwrap_or_else(|| owner.clone()),
        }
    }
}

/// Registry key: an entity name within its owning document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub name: String,
    pub document: DocumentId,
}

impl EntityKey {
    pub fn new(name: impl Into<String>, document: impl Into<DocumentId>) -> Self {
        Self {
            name: name.into(),
            document: document.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.document)
    }
}

/// Live handle to a published entity.
///
/// `generation` identifies one publication of the owning document; a handle
/// whose document has since been unloaded (or reloaded) is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub document: DocumentId,
    pub generation: u64,
    pub block: BlockHandle,
}

/// Result of resolving an entity pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityLink {
    /// The pointer was null.
    Null,
    Resolved(EntityHandle),
    /// The owning document is not loaded yet; resolution is queued.
    Pending(EntityKey),
    /// The entity was excluded from loading or is absent from its document.
    Missing(EntityKey),
    /// The token does not name an entity record of the referring document.
    Invalid(Address),
}

impl EntityLink {
    pub fn handle(&self) -> Option<&EntityHandle> {
        match self {
            EntityLink::Resolved(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EntityLink::Resolved(_))
    }
}
