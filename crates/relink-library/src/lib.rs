//! Cross-document linking for relink documents.
//!
//! A document may hold placeholders for entities owned by other documents.
//! This crate resolves those references at load time:
//!
//! - [`IdentityRegistry`]: process-wide map from `(entity, document)` to the
//!   live, generation-tagged handle of every published entity
//! - [`LibReader`]: resolves entity-pointer slots through the registry into
//!   its session's [`LinkTable`], queueing references into documents that
//!   are not loaded yet
//! - [`Expander`]: loads the documents reachable from the requested entities
//! - [`LoadSession`]: drives one load and produces a [`LoadReport`]
//!
//! Documents come from a [`DocumentLoader`]; per-type behaviour plugs in
//! through [`DataHandler`] and [`IdWalker`].

pub mod config;
pub mod error;
pub mod expander;
pub mod handler;
pub mod lib_reader;
pub mod loader;
pub mod registry;
pub mod session;
pub mod walker;

#[cfg(test)]
mod testing;

pub use config::{LoadConfig, SessionConfig, WriteConfig};
pub use error::{ConfigError, LoadError, SessionError};
pub use expander::{ExpandState, Expander, DEFAULT_MAX_DOCUMENTS};
pub use handler::{DataHandler, HandlerSet, RelinkHandler};
pub use lib_reader::{LibReader, LinkSummary, LinkTable, PendingReference};
pub use loader::{CancelToken, DirectoryLoader, DocumentLoader, MemoryLoader, EXTENSION};
pub use registry::IdentityRegistry;
pub use session::{DocumentIssue, FailedEntity, LoadReport, LoadSession, SessionContext};
pub use walker::{CatalogWalker, FieldWalker, IdWalker, WalkerSet};
