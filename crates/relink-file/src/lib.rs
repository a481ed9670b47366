//! relink document files: container format, writer and data reader.
//!
//! Layout of a document:
//!
//! ```text
//! magic "RLNK" | version u8x3 | flags u8 | endian 'v'/'V' | pad u8x3
//! catalog fingerprint [u8; 32]
//! document id: u16 length + UTF-8
//! records*: kind u8 | pad u8 | struct_id u16 | identity u64 | count u32 | length u32 | payload
//! end record (kind 0xFF)
//! SHA-256 of everything above [u8; 32]
//! ```
//!
//! Entity and link payloads start with the entity name and the owning
//! library, each as a u16 length plus UTF-8 (an empty library means the
//! entity is local).

pub mod document;
pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod testing;

pub use document::{AddressTable, Block, LoadedDocument, LocalLink, Slot};
pub use error::{ReadError, ReadIssue, WriteError};
pub use format::{
    Document, DocumentFlags, DocumentHeader, FormatError, FormatVersion, Record, RecordKind, MAGIC,
};
pub use reader::{DataReader, LocalPointer, NodeVisitor};
pub use writer::{NodeMemory, WriteOptions, Writer};
