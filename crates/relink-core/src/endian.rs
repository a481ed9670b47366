//! Byte-order detection and in-place swapping.
//!
//! Swapping is element-wise reversal, so applying it twice is the identity
//! and a big-endian document read on a little-endian host yields the same
//! bits as a little-endian document read on a little-endian host.

use serde::{Deserialize, Serialize};

use crate::catalog::StructDescriptor;

/// Byte order of a document or host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running host.
    pub const fn host() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// The other byte order.
    pub const fn opposite(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    pub fn is_host(self) -> bool {
        self == Endian::host()
    }

    /// Header marker byte: `v` for little endian, `V` for big endian.
    pub fn marker(self) -> u8 {
        match self {
            Endian::Little => b'v',
            Endian::Big => b'V',
        }
    }

    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'v' => Some(Endian::Little),
            b'V' => Some(Endian::Big),
            _ => None,
        }
    }
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endian::Little => write!(f, "little"),
            Endian::Big => write!(f, "big"),
        }
    }
}

/// Reverse every `width`-byte element of `bytes` in place.
///
/// Trailing bytes that do not form a whole element are left untouched.
pub fn swap_elements(bytes: &mut [u8], width: usize) {
    if width < 2 {
        return;
    }
    for element in bytes.chunks_exact_mut(width) {
        element.reverse();
    }
}

/// Swap every multi-byte field of `count` consecutive struct instances.
///
/// Pointer slots are swapped as 8-byte tokens. `bytes` must hold at least
/// `count * descriptor.size` bytes.
pub fn swap_struct(descriptor: &StructDescriptor, bytes: &mut [u8], count: usize) {
    for element in 0..count {
        let base = element * descriptor.size;
        for field in &descriptor.fields {
            let start = base + field.offset;
            let end = start + field.size();
            if end > bytes.len() {
                return;
            }
            swap_elements(&mut bytes[start..end], field.kind.swap_width());
        }
    }
}
