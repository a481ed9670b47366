//! Identity tokens and reader-side block handles.
//!
//! An [`Address`] is the opaque token a writer records in place of a source
//! memory address. It is only meaningful within the session that produced it
//! and is never dereferenced. A [`BlockHandle`] names a block freshly
//! allocated by a reader.

use serde::{Deserialize, Serialize};

/// Opaque identity token. Zero is the null token.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Address(u64);

impl Address {
    /// The null token.
    pub const NULL: Address = Address(0);

    pub const fn new(raw: u64) -> Self {
        Address(raw)
    }

    /// The raw token value.
    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Address(raw)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Index of a block reconstructed by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHandle(u32);

impl BlockHandle {
    pub const fn new(index: u32) -> Self {
        BlockHandle(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<usize> for BlockHandle {
    type Error = std::num::TryFromIntError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        u32::try_from(index).map(BlockHandle)
    }
}

impl std::fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
