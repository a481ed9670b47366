//! Document container format.
//!
//! A document is a fixed preamble (magic, version, flags, byte-order marker),
//! the fingerprint of the catalog it was written with, the document id, a
//! sequence of tagged records, an end record, and a SHA-256 trailer over
//! everything before it. Header and record fields after the preamble are
//! stored in the document byte order.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};
use thiserror::Error;

use relink_core::{Address, ContentHash, DocumentId, Endian, EntityMeta, StructId};

/// Magic bytes identifying a relink document: "RLNK"
pub const MAGIC: [u8; 4] = *b"RLNK";

/// magic (4) + version (3) + flags (1) + endian marker (1) + padding (3)
const PREAMBLE_SIZE: usize = 12;

const FINGERPRINT_SIZE: usize = 32;

/// Size of the trailing content hash.
const HASH_SIZE: usize = 32;

/// kind (1) + pad (1) + struct id (2) + identity (8) + count (4) + length (4)
pub const RECORD_HEADER_SIZE: usize = 20;

/// Smallest well-formed document: empty id, no records, end marker.
const MIN_SIZE: usize = PREAMBLE_SIZE + FINGERPRINT_SIZE + 2 + RECORD_HEADER_SIZE + HASH_SIZE;

/// Errors raised while decoding or encoding the container.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid magic bytes: expected RLNK")]
    InvalidMagic,

    #[error("unsupported format version {major}.{minor}.{patch}")]
    UnsupportedVersion { major: u8, minor: u8, patch: u8 },

    #[error("invalid byte-order marker {0:#04x}")]
    InvalidEndianMarker(u8),

    #[error("content hash mismatch: document is corrupted")]
    HashMismatch,

    #[error("file too small to be a relink document")]
    FileTooSmall,

    #[error("truncated at byte {offset}: {needed} more bytes expected")]
    Truncated { offset: usize, needed: usize },

    #[error("malformed record at byte {offset}: {detail}")]
    MalformedRecord { offset: usize, detail: String },

    #[error("unknown record kind {kind:#04x} at byte {offset}")]
    UnknownRecordKind { offset: usize, kind: u8 },

    #[error("record stream ends without an end marker")]
    MissingEndMarker,

    #[error("name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Container format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FormatVersion {
    /// The current format version.
    pub const CURRENT: FormatVersion = FormatVersion {
        major: 0,
        minor: 1,
        patch: 0,
    };

    /// Pre-stable: same major, minor no newer than ours.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major && self.minor <= Self::CURRENT.minor
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Document flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentFlags {
    bits: u8,
}

impl DocumentFlags {
    pub const NONE: DocumentFlags = DocumentFlags { bits: 0 };

    /// Written by a transient (undo) save.
    pub const UNDO: u8 = 0x01;

    /// Payload is compressed (reserved for future use).
    pub const COMPRESSED: u8 = 0x02;

    pub fn new(bits: u8) -> Self {
        Self { bits }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.bits & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.bits |= flag;
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }
}

/// Tag of a record in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// One or more struct instances.
    Data = 0x01,
    /// An untyped byte buffer.
    Raw = 0x02,
    /// A top-level entity owned by this document.
    Entity = 0x03,
    /// A placeholder for an entity owned by another document.
    Link = 0x04,
    End = 0xFF,
}

impl RecordKind {
    /// Whether the payload starts with entity linking metadata.
    pub fn carries_meta(self) -> bool {
        matches!(self, RecordKind::Entity | RecordKind::Link)
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Data => "data",
            RecordKind::Raw => "raw",
            RecordKind::Entity => "entity",
            RecordKind::Link => "link",
            RecordKind::End => "end",
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RecordKind::Data),
            0x02 => Ok(RecordKind::Raw),
            0x03 => Ok(RecordKind::Entity),
            0x04 => Ok(RecordKind::Link),
            0xFF => Ok(RecordKind::End),
            other => Err(other),
        }
    }
}

/// Decoded document header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    pub version: FormatVersion,
    pub flags: DocumentFlags,
    pub endian: Endian,
    pub fingerprint: ContentHash,
    pub document: DocumentId,
}

impl DocumentHeader {
    pub fn is_undo(&self) -> bool {
        self.flags.has(DocumentFlags::UNDO)
    }
}

/// One decoded record. The payload is still in the document byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    /// `None` for raw records.
    pub struct_id: Option<StructId>,
    pub identity: Address,
    /// Element count: struct instances, or bytes for raw records.
    pub count: u32,
    pub entity: Option<EntityMeta>,
    pub payload: Vec<u8>,
}

/// A decoded document: header plus records in stream order.
#[derive(Debug, Clone)]
pub struct Document {
    pub header: DocumentHeader,
    pub records: Vec<Record>,
}

impl Document {
    /// Deserialize from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Deserialize from a byte slice, verifying the trailer first.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < MIN_SIZE {
            return Err(FormatError::FileTooSmall);
        }
        if data[0..4] != MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let version = FormatVersion {
            major: data[4],
            minor: data[5],
            patch: data[6],
        };
        if !version.is_compatible() {
            return Err(FormatError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
                patch: version.patch,
            });
        }
        let flags = DocumentFlags::new(data[7]);
        let endian = Endian::from_marker(data[8]).ok_or(FormatError::InvalidEndianMarker(data[8]))?;

        let body_end = data.len() - HASH_SIZE;
        let computed: [u8; 32] = Sha256::digest(&data[..body_end]).into();
        if computed[..] != data[body_end..] {
            return Err(FormatError::HashMismatch);
        }

        let mut reader = ByteReader::new(&data[..body_end], endian, PREAMBLE_SIZE);
        let mut fingerprint = [0u8; FINGERPRINT_SIZE];
        fingerprint.copy_from_slice(reader.take(FINGERPRINT_SIZE)?);
        let document = DocumentId::new(reader.short_str()?);

        let mut records = Vec::new();
        loop {
            if reader.remaining() == 0 {
                return Err(FormatError::MissingEndMarker);
            }
            match reader.record()? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        if reader.remaining() != 0 {
            return Err(FormatError::MalformedRecord {
                offset: reader.position(),
                detail: format!("{} bytes after the end marker", reader.remaining()),
            });
        }

        Ok(Self {
            header: DocumentHeader {
                version,
                flags,
                endian,
                fingerprint,
                document,
            },
            records,
        })
    }
}

/// Cursor over document bytes that decodes in the document byte order.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], endian: Endian, pos: usize) -> Self {
        Self { data, pos, endian }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if len > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FormatError> {
        let bytes = self.take(2)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        })
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let bytes = self.take(4)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        })
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let bytes = self.take(8)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u64(bytes),
            Endian::Big => BigEndian::read_u64(bytes),
        })
    }

    /// u16 length prefix followed by UTF-8.
    fn short_str(&mut self) -> Result<String, FormatError> {
        let offset = self.pos;
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FormatError::MalformedRecord {
            offset,
            detail: format!("invalid UTF-8 in name: {e}"),
        })
    }

    /// Decode one record; `None` at the end marker.
    fn record(&mut self) -> Result<Option<Record>, FormatError> {
        let offset = self.pos;
        let raw_kind = self.u8()?;
        let kind = RecordKind::try_from(raw_kind)
            .map_err(|kind| FormatError::UnknownRecordKind { offset, kind })?;
        let _pad = self.u8()?;
        let struct_id = self.u16()?;
        let identity = Address::new(self.u64()?);
        let count = self.u32()?;
        let length = self.u32()? as usize;

        if kind == RecordKind::End {
            return Ok(None);
        }
        let malformed = |detail: String| FormatError::MalformedRecord { offset, detail };
        if length > self.remaining() {
            return Err(malformed(format!(
                "payload length {length} exceeds the {} bytes left",
                self.remaining()
            )));
        }
        if identity.is_null() {
            return Err(malformed("null identity".to_string()));
        }
        let struct_id = match (kind, struct_id) {
            (RecordKind::Raw, StructId::RAW) => None,
            (RecordKind::Raw, other) => {
                return Err(malformed(format!("raw record tagged with struct id {other}")))
            }
            (_, StructId::RAW) => {
                return Err(malformed(format!("{} record without a struct id", kind.name())))
            }
            (_, id) => Some(StructId(id)),
        };

        let mut payload = ByteReader::new(self.take(length)?, self.endian, 0);
        let entity = if kind.carries_meta() {
            let name = payload.short_str()?;
            let library = payload.short_str()?;
            Some(EntityMeta {
                name,
                library: (!library.is_empty()).then(|| DocumentId::new(library)),
            })
        } else {
            None
        };
        let rest = payload.remaining();
        let payload = payload.take(rest)?.to_vec();

        Ok(Some(Record {
            kind,
            struct_id,
            identity,
            count,
            entity,
            payload,
        }))
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, endian: Endian, value: u16) {
    let mut buf = [0u8; 2];
    match endian {
        Endian::Little => LittleEndian::write_u16(&mut buf, value),
        Endian::Big => BigEndian::write_u16(&mut buf, value),
    }
    out.extend_from_slice(&buf);
}

pub(crate) fn put_u32(out: &mut Vec<u8>, endian: Endian, value: u32) {
    let mut buf = [0u8; 4];
    match endian {
        Endian::Little => LittleEndian::write_u32(&mut buf, value),
        Endian::Big => BigEndian::write_u32(&mut buf, value),
    }
    out.extend_from_slice(&buf);
}

pub(crate) fn put_u64(out: &mut Vec<u8>, endian: Endian, value: u64) {
    let mut buf = [0u8; 8];
    match endian {
        Endian::Little => LittleEndian::write_u64(&mut buf, value),
        Endian::Big => BigEndian::write_u64(&mut buf, value),
    }
    out.extend_from_slice(&buf);
}

pub(crate) fn put_short_str(
    out: &mut Vec<u8>,
    endian: Endian,
    value: &str,
) -> Result<(), FormatError> {
    let len = u16::try_from(value.len()).map_err(|_| FormatError::NameTooLong {
        name: value.to_string(),
        max: u16::MAX as usize,
    })?;
    put_u16(out, endian, len);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Preamble, catalog fingerprint and document id.
pub(crate) fn encode_header(
    flags: DocumentFlags,
    endian: Endian,
    fingerprint: &ContentHash,
    document: &DocumentId,
) -> Result<Vec<u8>, FormatError> {
    let version = FormatVersion::CURRENT;
    let capacity = PREAMBLE_SIZE + FINGERPRINT_SIZE + 2 + document.as_str().len();
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&[version.major, version.minor, version.patch]);
    out.push(flags.bits());
    out.push(endian.marker());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(fingerprint);
    put_short_str(&mut out, endian, document.as_str())?;
    Ok(out)
}

pub(crate) fn encode_record_header(
    out: &mut Vec<u8>,
    endian: Endian,
    kind: RecordKind,
    struct_id: u16,
    identity: Address,
    count: u32,
    length: u32,
) {
    out.push(kind as u8);
    out.push(0);
    put_u16(out, endian, struct_id);
    put_u64(out, endian, identity.get());
    put_u32(out, endian, count);
    put_u32(out, endian, length);
}

pub(crate) fn encode_entity_meta(
    out: &mut Vec<u8>,
    endian: Endian,
    meta: &EntityMeta,
) -> Result<(), FormatError> {
    put_short_str(out, endian, &meta.name)?;
    let library = meta.library.as_ref().map(DocumentId::as_str).unwrap_or("");
    put_short_str(out, endian, library)
}
