//! A reconstructed document: fresh blocks, the token table that maps the
//! writer's identities onto them, and the local links patched in by the
//! data reader.
//!
//! Block bytes keep the writer's tokens in their pointer slots. Patched links
//! live beside the bytes, keyed by slot offset, so a block can always be
//! inspected as written. A loaded document is immutable once published;
//! entity-pointer resolutions belong to the session that made them.

use std::collections::{BTreeMap, HashMap};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use relink_core::{
    Address, BlockHandle, CatalogError, DocumentId, EntityKey, EntityMeta, Endian, FieldKind,
    Scalar, StructId, StructRef, TypeCatalog, POINTER_SIZE,
};

use crate::error::{ReadError, ReadIssue};
use crate::format::{DocumentHeader, RecordKind};

/// Outcome of patching one local pointer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalLink {
    Null,
    Block(BlockHandle),
    /// The token was never registered in this document.
    Unresolved(Address),
}

/// A pointer slot: block plus byte offset into its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub block: BlockHandle,
    pub offset: usize,
}

impl Slot {
    pub fn new(block: BlockHandle, offset: usize) -> Self {
        Self { block, offset }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.block, self.offset)
    }
}

/// Storage allocated for one record.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) identity: Address,
    pub(crate) kind: RecordKind,
    pub(crate) struct_id: Option<StructId>,
    pub(crate) count: u32,
    pub(crate) entity: Option<EntityMeta>,
    pub(crate) data: Vec<u8>,
    /// Bytes are in host order. Raw blocks settle on first typed read.
    pub(crate) settled: bool,
    pub(crate) links: BTreeMap<usize, LocalLink>,
}

impl Block {
    /// Token the writer gave this block.
    pub fn identity(&self) -> Address {
        self.identity
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn struct_id(&self) -> Option<StructId> {
        self.struct_id
    }

    /// Struct instances, or bytes for raw blocks.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn entity(&self) -> Option<&EntityMeta> {
        self.entity.as_ref()
    }

    /// A stand-in for an entity owned by another document.
    pub fn is_placeholder(&self) -> bool {
        self.kind == RecordKind::Link
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn link(&self, offset: usize) -> Option<LocalLink> {
        self.links.get(&offset).copied()
    }

    pub fn links(&self) -> impl Iterator<Item = (usize, LocalLink)> + '_ {
        self.links.iter().map(|(offset, link)| (*offset, *link))
    }

    /// Instance `index` of a struct block.
    pub fn element<'a>(
        &'a self,
        catalog: &'a TypeCatalog,
        handle: BlockHandle,
        index: usize,
    ) -> Result<StructRef<'a>, ReadError> {
        let id = self
            .struct_id
            .filter(|_| !self.is_placeholder())
            .ok_or(ReadError::NotAStruct { block: handle })?;
        let desc = catalog.descriptor(id)?;
        if index >= self.count() {
            return Err(ReadError::ArrayOutOfBounds {
                address: self.identity,
                needed: (index + 1) * desc.size,
                available: self.data.len(),
            });
        }
        let start = index * desc.size;
        Ok(StructRef::new(desc, &self.data[start..start + desc.size])?)
    }

    /// Token stored at `offset`, if the slot lies inside the block.
    pub fn token_at(&self, offset: usize) -> Option<Address> {
        self.data
            .get(offset..offset + POINTER_SIZE)
            .map(|bytes| Address::new(u64::from_ne_slice(bytes)))
    }
}

/// Token → block mapping for one document.
#[derive(Debug, Clone, Default)]
pub struct AddressTable {
    map: HashMap<Address, BlockHandle>,
}

impl AddressTable {
    /// Register `token`; the first registration wins.
    pub fn insert(&mut self, token: Address, handle: BlockHandle) -> bool {
        if self.map.contains_key(&token) {
            return false;
        }
        self.map.insert(token, handle);
        true
    }

    pub fn get(&self, token: Address) -> Option<BlockHandle> {
        self.map.get(&token).copied()
    }

    pub fn contains(&self, token: Address) -> bool {
        self.map.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A fully read document, ready to be linked and published.
#[derive(Debug)]
pub struct LoadedDocument {
    header: DocumentHeader,
    blocks: Vec<Block>,
    table: AddressTable,
    entities: Vec<BlockHandle>,
    by_name: HashMap<String, BlockHandle>,
    issues: Vec<ReadIssue>,
}

impl LoadedDocument {
    pub(crate) fn new(
        header: DocumentHeader,
        blocks: Vec<Block>,
        table: AddressTable,
        entities: Vec<BlockHandle>,
        by_name: HashMap<String, BlockHandle>,
        issues: Vec<ReadIssue>,
    ) -> Self {
        Self {
            header,
            blocks,
            table,
            entities,
            by_name,
            issues,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.header.document
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn block(&self, handle: BlockHandle) -> Result<&Block, ReadError> {
        self.blocks
            .get(handle.index())
            .ok_or(ReadError::InvalidBlock { block: handle })
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockHandle, &Block)> {
        (0u32..)
            .zip(self.blocks.iter())
            .map(|(i, block)| (BlockHandle::new(i), block))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn resolve(&self, token: Address) -> Option<BlockHandle> {
        self.table.get(token)
    }

    /// Local entity named `name`.
    pub fn entity(&self, name: &str) -> Option<BlockHandle> {
        self.by_name.get(name).copied()
    }

    /// Local entity blocks in stream order.
    pub fn entities(&self) -> &[BlockHandle] {
        &self.entities
    }

    pub fn entity_name(&self, handle: BlockHandle) -> Option<&str> {
        self.blocks
            .get(handle.index())
            .and_then(|b| b.entity.as_ref())
            .map(|meta| meta.name.as_str())
    }

    /// Registry key of the entity record a raw entity pointer names.
    ///
    /// `None` when the token does not name an entity or placeholder record.
    pub fn entity_target(&self, token: Address) -> Option<EntityKey> {
        let handle = self.table.get(token)?;
        let meta = self.blocks.get(handle.index())?.entity.as_ref()?;
        Some(meta.key_in(self.id()))
    }

    pub fn view<'a>(
        &'a self,
        catalog: &'a TypeCatalog,
        handle: BlockHandle,
    ) -> Result<StructRef<'a>, ReadError> {
        self.block(handle)?.element(catalog, handle, 0)
    }

    /// Follow the data pointer `field` of the first instance in `handle`.
    pub fn follow(
        &self,
        catalog: &TypeCatalog,
        handle: BlockHandle,
        field: &str,
    ) -> Result<Option<BlockHandle>, ReadError> {
        let block = self.block(handle)?;
        let offset = field_offset(catalog, block, handle, field)?;
        match block.link(offset) {
            Some(LocalLink::Block(target)) => Ok(Some(target)),
            Some(LocalLink::Null) => Ok(None),
            Some(LocalLink::Unresolved(address)) => {
                Err(ReadError::UnresolvedLocalPointer { address })
            }
            None => {
                let token = block.token_at(offset).unwrap_or(Address::NULL);
                if token.is_null() {
                    return Ok(None);
                }
                self.table
                    .get(token)
                    .map(Some)
                    .ok_or(ReadError::UnresolvedLocalPointer { address: token })
            }
        }
    }

    /// Every non-null entity pointer slot with the token it holds.
    pub fn entity_slots(
        &self,
        catalog: &TypeCatalog,
    ) -> Result<Vec<(Slot, Address)>, CatalogError> {
        let mut slots = Vec::new();
        for (handle, block) in self.blocks() {
            let Some(id) = block.struct_id else { continue };
            if block.is_placeholder() {
                continue;
            }
            let desc = catalog.descriptor(id)?;
            if !desc.has_entity_pointers() {
                continue;
            }
            for element in 0..block.count() {
                let base = element * desc.size;
                for field in desc.fields.iter().filter(|f| f.kind == FieldKind::EntityPointer) {
                    for i in 0..field.count {
                        let offset = base + field.element_offset(i);
                        match block.token_at(offset) {
                            Some(token) if !token.is_null() => {
                                slots.push((Slot::new(handle, offset), token));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(slots)
    }

    /// Slot and raw token of entity pointer `field` of the first instance in
    /// `handle`.
    pub fn entity_slot(
        &self,
        catalog: &TypeCatalog,
        handle: BlockHandle,
        field: &str,
    ) -> Result<(Slot, Address), ReadError> {
        let block = self.block(handle)?;
        let offset = field_offset(catalog, block, handle, field)?;
        let token = block.token_at(offset).unwrap_or(Address::NULL);
        Ok((Slot::new(handle, offset), token))
    }

    /// Decoded elements of a raw pointer-array block.
    ///
    /// A block no typed read has settled is still in the writer's byte order
    /// and is decoded in that order.
    pub fn pointer_array(&self, handle: BlockHandle) -> Result<Vec<Address>, ReadError> {
        let block = self.block(handle)?;
        let chunks = block.data.chunks_exact(POINTER_SIZE);
        let tokens: Vec<u64> = if block.settled {
            chunks.map(u64::from_ne_slice).collect()
        } else {
            match self.header.endian {
                Endian::Little => chunks.map(LittleEndian::read_u64).collect(),
                Endian::Big => chunks.map(BigEndian::read_u64).collect(),
            }
        };
        Ok(tokens.into_iter().map(Address::new).collect())
    }

    pub fn issues(&self) -> &[ReadIssue] {
        &self.issues
    }
}

fn field_offset(
    catalog: &TypeCatalog,
    block: &Block,
    handle: BlockHandle,
    field: &str,
) -> Result<usize, ReadError> {
    let id = block
        .struct_id
        .ok_or(ReadError::NotAStruct { block: handle })?;
    Ok(catalog.descriptor(id)?.require_field(field)?.offset)
}
