use std::io;

use thiserror::Error;

use relink_core::{Address, BlockHandle, CatalogError};

use crate::format::FormatError;

/// Errors raised by a [`Writer`](crate::Writer).
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("'{strukt}' data is {actual} bytes, expected {expected}")]
    SizeMismatch {
        strukt: String,
        expected: usize,
        actual: usize,
    },

    #[error("list node {address} is not present in memory")]
    MissingListNode { address: Address },

    #[error("list loops back to node {address}")]
    ListCycle { address: Address },

    #[error("record of {len} bytes exceeds the format limit")]
    RecordTooLarge { len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by a [`DataReader`](crate::DataReader).
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("document was written with catalog {found}, reader uses {expected}")]
    CatalogMismatch { expected: String, found: String },

    #[error("record {identity} of '{strukt}' holds {actual} bytes, expected {expected}")]
    RecordSize {
        identity: Address,
        strukt: String,
        expected: usize,
        actual: usize,
    },

    #[error("unresolved local pointer {address}")]
    UnresolvedLocalPointer { address: Address },

    #[error("no block {block}")]
    InvalidBlock { block: BlockHandle },

    #[error("block {block} does not hold structs")]
    NotAStruct { block: BlockHandle },

    #[error("list node {address} could not be resolved")]
    BrokenList { address: Address },

    #[error("list revisits block {block}")]
    ListCycle { block: BlockHandle },

    #[error("{len} elements of {width} bytes at {address} overflow the address space")]
    ArrayOverflow {
        address: Address,
        len: usize,
        width: usize,
    },

    #[error("document holds more than {count} blocks")]
    TooManyBlocks { count: usize },

    #[error("buffer {address} holds {available} bytes, {needed} requested")]
    ArrayOutOfBounds {
        address: Address,
        needed: usize,
        available: usize,
    },
}

/// A soft problem met while reconstructing a document.
///
/// Issues never abort a read; they are collected on the loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadIssue {
    /// A pointer slot names a token no record carried; the slot reads as null.
    UnresolvedPointer {
        block: BlockHandle,
        offset: usize,
        address: Address,
    },
    /// A later record repeated a token; it was dropped.
    DuplicateIdentity { address: Address },
    /// Two entity records share a name; the later one is not indexed.
    DuplicateEntity { name: String },
    BrokenList {
        block: BlockHandle,
        offset: usize,
        detail: String,
    },
    /// A data handler failed on an entity block.
    Handler { block: BlockHandle, detail: String },
}

impl std::fmt::Display for ReadIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadIssue::UnresolvedPointer {
                block,
                offset,
                address,
            } => write!(f, "block {block} +{offset}: unresolved pointer {address}"),
            ReadIssue::DuplicateIdentity { address } => {
                write!(f, "duplicate record identity {address}")
            }
            ReadIssue::DuplicateEntity { name } => write!(f, "duplicate entity name '{name}'"),
            ReadIssue::BrokenList {
                block,
                offset,
                detail,
            } => write!(f, "block {block} +{offset}: broken list: {detail}"),
            ReadIssue::Handler { block, detail } => write!(f, "block {block}: {detail}"),
        }
    }
}
