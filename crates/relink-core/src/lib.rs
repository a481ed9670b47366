//! Core types for the relink persistence engine.
//!
//! relink stores a graph of typed structs, raw buffers, linked lists and
//! cross-document references as a stream of tagged records, and rebuilds an
//! equivalent graph on load. This crate holds what every stage shares:
//!
//! - **Type catalog**: struct names, ids and flattened field layouts
//! - **Identity tokens**: opaque stand-ins for source addresses
//! - **Byte order**: host detection and symmetric in-place swapping
//! - **Field access**: typed reads and writes of catalog-laid-out bytes
//! - **Entity identity**: documents, entity keys, handles and links

pub mod address;
pub mod catalog;
pub mod endian;
pub mod entity;
pub mod field;
pub mod hash;

pub use address::{Address, BlockHandle};
pub use catalog::{
    CatalogDefinition, CatalogError, FieldDefinition, FieldDescriptor, FieldKind, FieldSpec,
    PointerTarget, Primitive, StructDefinition, StructDescriptor, StructId, TypeCatalog,
    TypeCatalogBuilder, POINTER_SIZE,
};
pub use endian::{swap_elements, swap_struct, Endian};
pub use entity::{DocumentId, EntityHandle, EntityKey, EntityLink, EntityMeta};
pub use field::{FieldAccess, ListBase, Scalar, StructRef, StructValue};
pub use hash::{content_hash, hash_bytes, hash_hex, ContentHash};
