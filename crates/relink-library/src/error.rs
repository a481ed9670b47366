//! Library-linking error types.

use relink_core::{CatalogError, DocumentId};

/// Errors raised while obtaining and reading one document.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The loader has no such document.
    #[error("document not found: {document}")]
    DocumentNotFound { document: DocumentId },

    /// The bytes could not be decoded or reconstructed.
    #[error("document '{document}' is corrupt: {detail}")]
    DocumentCorrupt { document: DocumentId, detail: String },

    /// The session's document budget is spent.
    #[error("document limit of {limit} reached before loading '{document}'")]
    LimitReached { document: DocumentId, limit: usize },

    #[error("loading '{document}' was cancelled")]
    Cancelled { document: DocumentId },

    #[error("I/O error reading '{document}': {detail}")]
    Io { document: DocumentId, detail: String },
}

impl LoadError {
    pub fn document(&self) -> &DocumentId {
        match self {
            LoadError::DocumentNotFound { document }
            | LoadError::DocumentCorrupt { document, .. }
            | LoadError::LimitReached { document, .. }
            | LoadError::Cancelled { document }
            | LoadError::Io { document, .. } => document,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled { .. })
    }
}

/// Errors that abort a whole load session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The root document could not be loaded.
    #[error("root document '{document}' failed to load: {source}")]
    Root {
        document: DocumentId,
        source: LoadError,
    },

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Errors reading a session configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {detail}")]
    Invalid { detail: String },
}
