//! Document loader trait and the in-memory and directory implementations.
//!
//! The loader only delivers bytes. Decoding, reconstruction and publication
//! are the session's job, so a loader never touches the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use relink_core::DocumentId;

use crate::error::LoadError;

/// File extension of documents in a [`DirectoryLoader`].
pub const EXTENSION: &str = "rlnk";

/// Shared cancellation flag for a load session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self, document: &DocumentId) -> Result<(), LoadError> {
        if self.is_cancelled() {
            return Err(LoadError::Cancelled {
                document: document.clone(),
            });
        }
        Ok(())
    }
}

/// Source of document bytes.
///
/// Implementations may block; they should poll `cancel` and give up with
/// [`LoadError::Cancelled`] when it is raised.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, document: &DocumentId, cancel: &CancelToken) -> Result<Vec<u8>, LoadError>;
}

/// Documents held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    documents: RwLock<HashMap<DocumentId, Vec<u8>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: impl Into<DocumentId>, bytes: Vec<u8>) {
        self.documents.write().insert(document.into(), bytes);
    }

    pub fn remove(&self, document: &DocumentId) -> Option<Vec<u8>> {
        self.documents.write().remove(document)
    }

    pub fn contains(&self, document: &DocumentId) -> bool {
        self.documents.read().contains_key(document)
    }
}

impl DocumentLoader for MemoryLoader {
    fn load(&self, document: &DocumentId, cancel: &CancelToken) -> Result<Vec<u8>, LoadError> {
        cancel.check(document)?;
        self.documents
            .read()
            .get(document)
            .cloned()
            .ok_or_else(|| LoadError::DocumentNotFound {
                document: document.clone(),
            })
    }
}

/// Documents stored as files in one directory.
///
/// Layout:
/// ```text
/// <root>/
///   <document-id>.rlnk
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryLoader { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `document`, refusing ids that would escape the root.
    pub fn path_for(&self, document: &DocumentId) -> Result<PathBuf, LoadError> {
        let id = document.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(LoadError::DocumentNotFound {
                document: document.clone(),
            });
        }
        Ok(self.root.join(format!("{id}.{EXTENSION}")))
    }
}

impl DocumentLoader for DirectoryLoader {
    fn load(&self, document: &DocumentId, cancel: &CancelToken) -> Result<Vec<u8>, LoadError> {
        cancel.check(document)?;
        let path = self.path_for(document)?;
        if !path.is_file() {
            return Err(LoadError::DocumentNotFound {
                document: document.clone(),
            });
        }
        std::fs::read(&path).map_err(|e| LoadError::Io {
            document: document.clone(),
            detail: format!("{}: {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_round_trip() {
        let loader = MemoryLoader::new();
        loader.insert("scene", vec![1, 2, 3]);
        let cancel = CancelToken::new();
        assert_eq!(
            loader.load(&DocumentId::new("scene"), &cancel).unwrap(),
            vec![1, 2, 3]
        );
        assert!(matches!(
            loader.load(&DocumentId::new("other"), &cancel),
            Err(LoadError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn cancelled_token_stops_loads() {
        let loader = MemoryLoader::new();
        loader.insert("scene", vec![1]);
        let cancel = CancelToken::new();
        let shared = cancel.clone();
        shared.cancel();
        assert!(cancel.is_cancelled());
        assert!(matches!(
            loader.load(&DocumentId::new("scene"), &cancel),
            Err(LoadError::Cancelled { .. })
        ));
    }

    #[test]
    fn directory_loader_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rlnk"), b"bytes").unwrap();
        let loader = DirectoryLoader::new(dir.path());
        let cancel = CancelToken::new();

        assert_eq!(
            loader.load(&DocumentId::new("lib"), &cancel).unwrap(),
            b"bytes".to_vec()
        );
        assert!(matches!(
            loader.load(&DocumentId::new("absent"), &cancel),
            Err(LoadError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn directory_loader_rejects_escaping_ids() {
        let loader = DirectoryLoader::new("/tmp/docs");
        for id in ["", "../secret", "a/b", "a\\b", ".."] {
            assert!(
                loader.path_for(&DocumentId::new(id)).is_err(),
                "{id:?} should be rejected"
            );
        }
        assert_eq!(
            loader.path_for(&DocumentId::new("lib.v2")).unwrap(),
            Path::new("/tmp/docs/lib.v2.rlnk")
        );
    }
}
