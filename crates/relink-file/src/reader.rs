//! Data-address reconstruction.
//!
//! [`DataReader::new`] allocates one block per record and registers its
//! token. Struct blocks are put into host order on allocation. Raw blocks are
//! put into host order by the first typed read, which knows the element width.
//! Pointer slots are then patched either by the strict readers
//! (`read_data_address`, `read_list`, typed arrays) or by the catalog-driven
//! [`DataReader::relink`] pass.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use relink_core::{
    hash_hex, swap_elements, swap_struct, Address, BlockHandle, FieldKind, PointerTarget, Scalar,
    StructRef, TypeCatalog, POINTER_SIZE,
};

use crate::document::{AddressTable, Block, LoadedDocument, LocalLink};
use crate::error::{ReadError, ReadIssue};
use crate::format::{Document, DocumentHeader, Record, RecordKind};

/// Result of resolving a token against the address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPointer {
    Null,
    Resolved(BlockHandle),
    /// Never registered: data that was not written, or an entity pointer
    /// left to the library pass.
    Unresolved(Address),
}

impl From<LocalPointer> for LocalLink {
    fn from(pointer: LocalPointer) -> Self {
        match pointer {
            LocalPointer::Null => LocalLink::Null,
            LocalPointer::Resolved(handle) => LocalLink::Block(handle),
            LocalPointer::Unresolved(address) => LocalLink::Unresolved(address),
        }
    }
}

/// Per-node hook for [`DataReader::read_list`].
///
/// Called once per node, in list order, after the node's `next` and `prev`
/// slots are patched; the node's own pointer fields are the visitor's job.
pub trait NodeVisitor {
    fn visit(&mut self, reader: &mut DataReader<'_>, node: BlockHandle) -> Result<(), ReadError>;
}

impl<F> NodeVisitor for F
where
    F: FnMut(&mut DataReader<'_>, BlockHandle) -> Result<(), ReadError>,
{
    fn visit(&mut self, reader: &mut DataReader<'_>, node: BlockHandle) -> Result<(), ReadError> {
        self(reader, node)
    }
}

/// Queues every visited node for the relink worklist.
struct Enqueue<'s>(&'s mut Vec<BlockHandle>);

impl NodeVisitor for Enqueue<'_> {
    fn visit(&mut self, _reader: &mut DataReader<'_>, node: BlockHandle) -> Result<(), ReadError> {
        self.0.push(node);
        Ok(())
    }
}

/// Reconstructs the blocks of one document.
pub struct DataReader<'c> {
    catalog: &'c TypeCatalog,
    header: DocumentHeader,
    blocks: Vec<Block>,
    table: AddressTable,
    entities: Vec<BlockHandle>,
    by_name: HashMap<String, BlockHandle>,
    issues: Vec<ReadIssue>,
    relinked: HashSet<BlockHandle>,
    duplicates: usize,
}

impl<'c> DataReader<'c> {
    /// Allocate and register every record of `document`.
    ///
    /// Fails when the document was written against a different catalog, or a
    /// struct record's payload does not match its descriptor.
    pub fn new(catalog: &'c TypeCatalog, document: Document) -> Result<Self, ReadError> {
        if document.header.fingerprint != *catalog.fingerprint() {
            return Err(ReadError::CatalogMismatch {
                expected: hash_hex(catalog.fingerprint()),
                found: hash_hex(&document.header.fingerprint),
            });
        }
        let Document { header, records } = document;
        let mut reader = Self {
            catalog,
            header,
            blocks: Vec::with_capacity(records.len()),
            table: AddressTable::default(),
            entities: Vec::new(),
            by_name: HashMap::new(),
            issues: Vec::new(),
            relinked: HashSet::new(),
            duplicates: 0,
        };
        for record in records {
            reader.allocate_and_register(record)?;
        }
        debug!(
            document = %reader.header.document,
            blocks = reader.blocks.len(),
            entities = reader.entities.len(),
            duplicates = reader.duplicates,
            swap = reader.requires_endian_switch(),
            "allocated document blocks"
        );
        Ok(reader)
    }

    /// Allocate a block for `record` and register its token.
    ///
    /// A token seen before keeps its first block; the record is dropped and
    /// the existing handle returned.
    pub fn allocate_and_register(&mut self, record: Record) -> Result<BlockHandle, ReadError> {
        if let Some(existing) = self.table.get(record.identity) {
            self.duplicates += 1;
            warn!(
                document = %self.header.document,
                identity = %record.identity,
                "duplicate record identity, keeping the first block"
            );
            self.issues.push(ReadIssue::DuplicateIdentity {
                address: record.identity,
            });
            return Ok(existing);
        }

        let Record {
            kind,
            struct_id,
            identity,
            count,
            entity,
            payload: mut data,
        } = record;
        if let Some(id) = struct_id {
            let desc = self.catalog.descriptor(id)?;
            if kind != RecordKind::Link {
                let expected = desc.size.checked_mul(count as usize).ok_or(
                    ReadError::ArrayOverflow {
                        address: identity,
                        len: count as usize,
                        width: desc.size,
                    },
                )?;
                if data.len() != expected {
                    return Err(ReadError::RecordSize {
                        identity,
                        strukt: desc.name.clone(),
                        expected,
                        actual: data.len(),
                    });
                }
                if self.requires_endian_switch() {
                    swap_struct(desc, &mut data, count as usize);
                }
            }
        }
        let settled = struct_id.is_some() || !self.requires_endian_switch();

        let handle = BlockHandle::try_from(self.blocks.len()).map_err(|_| {
            ReadError::TooManyBlocks {
                count: self.blocks.len(),
            }
        })?;
        if kind == RecordKind::Entity {
            if let Some(meta) = &entity {
                if self.by_name.contains_key(&meta.name) {
                    warn!(name = %meta.name, "duplicate entity name");
                    self.issues.push(ReadIssue::DuplicateEntity {
                        name: meta.name.clone(),
                    });
                } else {
                    self.by_name.insert(meta.name.clone(), handle);
                }
                self.entities.push(handle);
            }
        }
        self.blocks.push(Block {
            identity,
            kind,
            struct_id,
            count,
            entity,
            data,
            settled,
            links: BTreeMap::new(),
        });
        self.table.insert(identity, handle);
        Ok(handle)
    }

    pub fn catalog(&self) -> &'c TypeCatalog {
        self.catalog
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    /// Whether the document byte order differs from the host's.
    pub fn requires_endian_switch(&self) -> bool {
        !self.header.endian.is_host()
    }

    pub fn block(&self, handle: BlockHandle) -> Result<&Block, ReadError> {
        self.blocks
            .get(handle.index())
            .ok_or(ReadError::InvalidBlock { block: handle })
    }

    fn block_mut(&mut self, handle: BlockHandle) -> Result<&mut Block, ReadError> {
        self.blocks
            .get_mut(handle.index())
            .ok_or(ReadError::InvalidBlock { block: handle })
    }

    /// Instance `index` of a struct block.
    pub fn view(&self, handle: BlockHandle, index: usize) -> Result<StructRef<'_>, ReadError> {
        self.block(handle)?.element(self.catalog, handle, index)
    }

    /// Local entity blocks in stream order.
    pub fn entities(&self) -> &[BlockHandle] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<BlockHandle> {
        self.by_name.get(name).copied()
    }

    /// Records dropped because their token was already registered.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn issues(&self) -> &[ReadIssue] {
        &self.issues
    }

    /// Attach a soft issue to the document being read.
    pub fn note(&mut self, issue: ReadIssue) {
        self.issues.push(issue);
    }

    /// Map a writer token to its block. Never fails.
    pub fn resolve_local_pointer(&self, old: Address) -> LocalPointer {
        if old.is_null() {
            return LocalPointer::Null;
        }
        match self.table.get(old) {
            Some(handle) => LocalPointer::Resolved(handle),
            None => LocalPointer::Unresolved(old),
        }
    }

    /// Patch the data pointer `field` of the first instance in `block`.
    pub fn read_data_address(
        &mut self,
        block: BlockHandle,
        field: &str,
    ) -> Result<Option<BlockHandle>, ReadError> {
        let offset = self.field_offset(block, field, |k| matches!(k, FieldKind::Pointer(_)))?;
        self.read_data_address_at(block, offset)
    }

    /// Patch the pointer slot at byte `offset` of `block`.
    ///
    /// An unregistered token is recorded on the slot and reported.
    pub fn read_data_address_at(
        &mut self,
        block: BlockHandle,
        offset: usize,
    ) -> Result<Option<BlockHandle>, ReadError> {
        let old = self.token_at(block, offset)?;
        let resolved = self.resolve_local_pointer(old);
        self.set_link(block, offset, resolved.into());
        match resolved {
            LocalPointer::Null => Ok(None),
            LocalPointer::Resolved(handle) => Ok(Some(handle)),
            LocalPointer::Unresolved(address) => Err(ReadError::UnresolvedLocalPointer { address }),
        }
    }

    /// Rebuild the list whose base is `field` of `owner`, in stored order.
    ///
    /// Node structs must have a `next` pointer field; a `prev` field, when
    /// present, is patched to the preceding node. The base's `first`/`last`
    /// slots are patched once the walk completes.
    pub fn read_list<V: NodeVisitor + ?Sized>(
        &mut self,
        owner: BlockHandle,
        field: &str,
        visitor: &mut V,
    ) -> Result<Vec<BlockHandle>, ReadError> {
        let offset = self.field_offset(owner, field, |k| k == FieldKind::ListBase)?;
        self.read_list_at(owner, offset, visitor)
    }

    pub fn read_list_at<V: NodeVisitor + ?Sized>(
        &mut self,
        owner: BlockHandle,
        offset: usize,
        visitor: &mut V,
    ) -> Result<Vec<BlockHandle>, ReadError> {
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut previous: Option<BlockHandle> = None;
        let mut current = self.token_at(owner, offset)?;

        while !current.is_null() {
            let node = match self.resolve_local_pointer(current) {
                LocalPointer::Resolved(node) => node,
                _ => return Err(ReadError::BrokenList { address: current }),
            };
            if !seen.insert(node) {
                return Err(ReadError::ListCycle { block: node });
            }
            let (next_offset, prev_offset) = self.node_offsets(node)?;
            let next = self.token_at(node, next_offset)?;
            self.set_link(node, next_offset, self.resolve_local_pointer(next).into());
            if let Some(prev_offset) = prev_offset {
                let previous = previous.map_or(LocalLink::Null, LocalLink::Block);
                self.set_link(node, prev_offset, previous);
            }
            visitor.visit(self, node)?;
            nodes.push(node);
            previous = Some(node);
            current = next;
        }

        let first = nodes.first().map_or(LocalLink::Null, |n| LocalLink::Block(*n));
        let last = nodes.last().map_or(LocalLink::Null, |n| LocalLink::Block(*n));
        self.set_link(owner, offset, first);
        self.set_link(owner, offset + POINTER_SIZE, last);
        Ok(nodes)
    }

    pub fn read_i32_array(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<i32>>, ReadError> {
        self.read_scalars(old, len)
    }

    pub fn read_u32_array(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<u32>>, ReadError> {
        self.read_scalars(old, len)
    }

    pub fn read_f32_array(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<f32>>, ReadError> {
        self.read_scalars(old, len)
    }

    /// `len` triples.
    pub fn read_f32x3_array(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<[f32; 3]>>, ReadError> {
        let flat_len = len.checked_mul(3).ok_or(ReadError::ArrayOverflow {
            address: old,
            len,
            width: 3 * f32::PRIMITIVE.width(),
        })?;
        Ok(self.read_scalars::<f32>(old, flat_len)?.map(|flat| {
            flat.chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect()
        }))
    }

    pub fn read_f64_array(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<f64>>, ReadError> {
        self.read_scalars(old, len)
    }

    /// Every element of a pointer array, as stored tokens.
    pub fn read_pointer_array(&mut self, old: Address) -> Result<Option<Vec<Address>>, ReadError> {
        let Some(handle) = self.settled_target(old, POINTER_SIZE)? else {
            return Ok(None);
        };
        let block = self.block(handle)?;
        Ok(Some(
            block
                .data
                .chunks_exact(POINTER_SIZE)
                .map(|bytes| Address::new(u64::from_ne_slice(bytes)))
                .collect(),
        ))
    }

    /// A NUL-terminated string buffer.
    pub fn read_string(&mut self, old: Address) -> Result<Option<String>, ReadError> {
        let Some(handle) = self.settled_target(old, 1)? else {
            return Ok(None);
        };
        let data = &self.block(handle)?.data;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(Some(String::from_utf8_lossy(&data[..end]).into_owned()))
    }

    /// Default data pass: patch every pointer slot reachable from `root`
    /// through its struct fields, lists and pointer arrays, and settle the
    /// byte order of typed buffers.
    ///
    /// Unregistered tokens and broken lists are recorded as issues and the
    /// slot reads as null; only structural errors fail the pass.
    pub fn relink(&mut self, root: BlockHandle) -> Result<(), ReadError> {
        let catalog = self.catalog;
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            if !self.relinked.insert(handle) {
                continue;
            }
            let block = self.block(handle)?;
            let Some(id) = block.struct_id else { continue };
            if block.is_placeholder() {
                continue;
            }
            let count = block.count();
            let desc = catalog.descriptor(id)?;

            for element in 0..count {
                let base = element * desc.size;
                for field in &desc.fields {
                    for i in 0..field.count {
                        let offset = base + field.element_offset(i);
                        match field.kind {
                            FieldKind::Pointer(target) => {
                                self.relink_pointer(handle, offset, target, &mut stack)?;
                            }
                            FieldKind::ListBase => {
                                let mut queue = Enqueue(&mut stack);
                                if let Err(e) = self.read_list_at(handle, offset, &mut queue) {
                                    self.soft_list_failure(handle, offset, e)?;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand the reconstructed blocks over.
    pub fn finish(self) -> LoadedDocument {
        LoadedDocument::new(
            self.header,
            self.blocks,
            self.table,
            self.entities,
            self.by_name,
            self.issues,
        )
    }

    fn relink_pointer(
        &mut self,
        handle: BlockHandle,
        offset: usize,
        target: PointerTarget,
        stack: &mut Vec<BlockHandle>,
    ) -> Result<(), ReadError> {
        let Some(resolved) = self.patch_soft(handle, offset)? else {
            return Ok(());
        };
        match target {
            PointerTarget::Struct => stack.push(resolved),
            PointerTarget::Array(primitive) => self.settle(resolved, primitive.width())?,
            PointerTarget::PointerArray => {
                self.settle(resolved, POINTER_SIZE)?;
                let len = self.block(resolved)?.data.len() / POINTER_SIZE;
                for i in 0..len {
                    if let Some(element) = self.patch_soft(resolved, i * POINTER_SIZE)? {
                        if self.block(element)?.struct_id.is_some() {
                            stack.push(element);
                        }
                    }
                }
            }
            PointerTarget::Raw => {}
        }
        Ok(())
    }

    /// Patch one slot, recording an issue instead of failing when unresolved.
    fn patch_soft(
        &mut self,
        handle: BlockHandle,
        offset: usize,
    ) -> Result<Option<BlockHandle>, ReadError> {
        match self.read_data_address_at(handle, offset) {
            Ok(target) => Ok(target),
            Err(ReadError::UnresolvedLocalPointer { address }) => {
                debug!(block = %handle, offset, %address, "unresolved local pointer");
                self.issues.push(ReadIssue::UnresolvedPointer {
                    block: handle,
                    offset,
                    address,
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn soft_list_failure(
        &mut self,
        handle: BlockHandle,
        offset: usize,
        error: ReadError,
    ) -> Result<(), ReadError> {
        match error {
            ReadError::BrokenList { .. } | ReadError::ListCycle { .. } => {
                warn!(block = %handle, offset, error = %error, "list could not be rebuilt");
                self.issues.push(ReadIssue::BrokenList {
                    block: handle,
                    offset,
                    detail: error.to_string(),
                });
                self.set_link(handle, offset, LocalLink::Null);
                self.set_link(handle, offset + POINTER_SIZE, LocalLink::Null);
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Put a raw block into host order, once.
    fn settle(&mut self, handle: BlockHandle, width: usize) -> Result<(), ReadError> {
        let swap = self.requires_endian_switch();
        let block = self.block_mut(handle)?;
        if !block.settled {
            if swap {
                swap_elements(&mut block.data, width);
            }
            block.settled = true;
        }
        Ok(())
    }

    fn settled_target(
        &mut self,
        old: Address,
        width: usize,
    ) -> Result<Option<BlockHandle>, ReadError> {
        match self.resolve_local_pointer(old) {
            LocalPointer::Null => Ok(None),
            LocalPointer::Unresolved(address) => {
                Err(ReadError::UnresolvedLocalPointer { address })
            }
            LocalPointer::Resolved(handle) => {
                self.settle(handle, width)?;
                Ok(Some(handle))
            }
        }
    }

    fn read_scalars<T: Scalar>(
        &mut self,
        old: Address,
        len: usize,
    ) -> Result<Option<Vec<T>>, ReadError> {
        let width = T::PRIMITIVE.width();
        let needed = len.checked_mul(width).ok_or(ReadError::ArrayOverflow {
            address: old,
            len,
            width,
        })?;
        let Some(handle) = self.settled_target(old, width)? else {
            return Ok(None);
        };
        let data = &self.block(handle)?.data;
        if needed > data.len() {
            return Err(ReadError::ArrayOutOfBounds {
                address: old,
                needed,
                available: data.len(),
            });
        }
        Ok(Some(
            data[..needed]
                .chunks_exact(width)
                .map(T::from_ne_slice)
                .collect(),
        ))
    }

    fn token_at(&self, handle: BlockHandle, offset: usize) -> Result<Address, ReadError> {
        let block = self.block(handle)?;
        block.token_at(offset).ok_or(ReadError::ArrayOutOfBounds {
            address: block.identity,
            needed: offset + POINTER_SIZE,
            available: block.data.len(),
        })
    }

    fn set_link(&mut self, handle: BlockHandle, offset: usize, link: LocalLink) {
        if let Some(block) = self.blocks.get_mut(handle.index()) {
            block.links.insert(offset, link);
        }
    }

    fn field_offset(
        &self,
        handle: BlockHandle,
        field: &str,
        check: impl Fn(FieldKind) -> bool,
    ) -> Result<usize, ReadError> {
        let block = self.block(handle)?;
        let id = block
            .struct_id
            .ok_or(ReadError::NotAStruct { block: handle })?;
        let desc = self.catalog.descriptor(id)?;
        let f = desc.require_field(field)?;
        if !check(f.kind) {
            return Err(relink_core::CatalogError::FieldKind {
                strukt: desc.name.clone(),
                field: f.name.clone(),
                expected: "pointer or list base".to_string(),
                actual: f.kind.describe(),
            }
            .into());
        }
        Ok(f.offset)
    }

    /// Offsets of the `next` and optional `prev` slots of a list node.
    fn node_offsets(&self, node: BlockHandle) -> Result<(usize, Option<usize>), ReadError> {
        let id = self
            .block(node)?
            .struct_id
            .ok_or(ReadError::NotAStruct { block: node })?;
        let desc = self.catalog.descriptor(id)?;
        let next = desc.require_field("next")?.offset;
        let prev = desc
            .field("prev")
            .filter(|f| matches!(f.kind, FieldKind::Pointer(_)))
            .map(|f| f.offset);
        Ok((next, prev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog, node_value, write_scene, NODE_VALUES, VERTS};
    use crate::writer::{WriteOptions, Writer};
    use relink_core::{Endian, FieldAccess, ListBase};

    fn read<'c>(catalog: &'c TypeCatalog, bytes: &[u8]) -> DataReader<'c> {
        DataReader::new(catalog, Document::from_bytes(bytes).unwrap()).unwrap()
    }

    /// Collects `value` of each visited node.
    #[derive(Default)]
    struct Values(Vec<i32>);

    impl NodeVisitor for Values {
        fn visit(
            &mut self,
            reader: &mut DataReader<'_>,
            node: BlockHandle,
        ) -> Result<(), ReadError> {
            self.0.push(reader.view(node, 0)?.get::<i32>("value")?);
            Ok(())
        }
    }

    fn check_scene(endian: Endian) {
        let catalog = catalog();
        let bytes = write_scene(&catalog, endian);
        let mut reader = read(&catalog, &bytes);
        assert_eq!(reader.requires_endian_switch(), !endian.is_host());

        let mesh = reader.entity("MECube").unwrap();
        let view = reader.view(mesh, 0).unwrap();
        assert_eq!(view.str("id.name").unwrap(), "MECube");
        assert_eq!(view.get::<i32>("totvert").unwrap(), VERTS.len() as i32);
        let verts = view.pointer("verts").unwrap();
        let indices = view.pointer("indices").unwrap();
        let label = view.pointer("label").unwrap();

        assert_eq!(
            reader.read_f32x3_array(verts, VERTS.len()).unwrap().unwrap(),
            VERTS.to_vec()
        );
        assert_eq!(
            reader.read_i32_array(indices, 3).unwrap().unwrap(),
            vec![0, 1, 2]
        );
        assert_eq!(reader.read_string(label).unwrap().unwrap(), "cube");

        let mut values = Values::default();
        let nodes = reader.read_list(mesh, "nodes", &mut values).unwrap();
        assert_eq!(values.0, NODE_VALUES.to_vec());
        assert_eq!(nodes.len(), NODE_VALUES.len());
        for (i, node) in nodes.iter().enumerate() {
            let weight = reader.view(*node, 0).unwrap().get::<f64>("weight").unwrap();
            assert_eq!(weight, NODE_VALUES[i] as f64 * 0.5);
        }
    }

    #[test]
    fn round_trip_host_order() {
        check_scene(Endian::host());
    }

    #[test]
    fn round_trip_foreign_order() {
        check_scene(Endian::host().opposite());
    }

    #[test]
    fn big_endian_int32_reads_back() {
        let catalog = catalog();
        let options = WriteOptions::new("be").endian(Endian::Big);
        let mut writer = Writer::to_vec(&catalog, options).unwrap();
        writer.write_i32_array(Address::new(0x40), &[1, 256, 65536]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = read(&catalog, &bytes);
        let values = reader.read_i32_array(Address::new(1), 3).unwrap().unwrap();
        assert_eq!(values, vec![1, 256, 65536]);
        // a second read must not swap again
        let again = reader.read_i32_array(Address::new(1), 3).unwrap().unwrap();
        assert_eq!(again, vec![1, 256, 65536]);
    }

    #[test]
    fn five_node_list_links_both_directions() {
        let catalog = catalog();
        let bytes = write_scene(&catalog, Endian::host().opposite());
        let mut reader = read(&catalog, &bytes);
        let mesh = reader.entity("MECube").unwrap();
        let mut noop = |_: &mut DataReader<'_>, _: BlockHandle| -> Result<(), ReadError> { Ok(()) };
        let nodes = reader.read_list(mesh, "nodes", &mut noop).unwrap();
        assert_eq!(nodes.len(), 5);

        let desc = catalog.descriptor_by_name("Node").unwrap();
        let next = desc.field("next").unwrap().offset;
        let prev = desc.field("prev").unwrap().offset;
        for (i, node) in nodes.iter().enumerate() {
            let block = reader.block(*node).unwrap();
            let expected_next = nodes.get(i + 1).map_or(LocalLink::Null, |n| LocalLink::Block(*n));
            let expected_prev = i
                .checked_sub(1)
                .map_or(LocalLink::Null, |p| LocalLink::Block(nodes[p]));
            assert_eq!(block.link(next), Some(expected_next));
            assert_eq!(block.link(prev), Some(expected_prev));
        }

        let base = catalog.descriptor_by_name("Mesh").unwrap().field("nodes").unwrap().offset;
        let owner = reader.block(mesh).unwrap();
        assert_eq!(owner.link(base), Some(LocalLink::Block(nodes[0])));
        assert_eq!(owner.link(base + POINTER_SIZE), Some(LocalLink::Block(nodes[4])));
    }

    #[test]
    fn repeated_address_shares_one_block() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, WriteOptions::new("dup")).unwrap();
        let node = writer.struct_id("Node").unwrap();
        let x = Address::new(0x1000);
        let holder = Address::new(0x2000);
        let first = node_value(&catalog, 1, 0.0, Address::NULL).into_bytes();
        let repeat = node_value(&catalog, 2, 0.0, Address::NULL).into_bytes();
        let pointing = node_value(&catalog, 3, 0.0, x).into_bytes();
        writer.write_struct(node, x, &first).unwrap();
        writer.write_struct(node, x, &repeat).unwrap();
        writer.write_struct(node, holder, &pointing).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = read(&catalog, &bytes);
        assert_eq!(reader.duplicates(), 1);
        assert_eq!(reader.issues().len(), 1);
        let shared = reader.resolve_local_pointer(Address::new(1));
        let LocalPointer::Resolved(shared) = shared else {
            panic!("expected the shared block, got {shared:?}");
        };
        assert_eq!(reader.view(shared, 0).unwrap().get::<i32>("value").unwrap(), 1);

        let holder = match reader.resolve_local_pointer(Address::new(2)) {
            LocalPointer::Resolved(h) => h,
            other => panic!("holder not registered: {other:?}"),
        };
        assert_eq!(reader.read_data_address(holder, "next").unwrap(), Some(shared));
    }

    #[test]
    fn unwritten_target_is_reported() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, WriteOptions::new("gap")).unwrap();
        let node = writer.struct_id("Node").unwrap();
        let data = node_value(&catalog, 1, 0.0, Address::new(0x9999)).into_bytes();
        writer.write_struct(node, Address::new(0x10), &data).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = read(&catalog, &bytes);
        // the pointer value got token 1, the node itself token 2
        assert_eq!(
            reader.resolve_local_pointer(Address::new(1)),
            LocalPointer::Unresolved(Address::new(1))
        );
        let LocalPointer::Resolved(handle) = reader.resolve_local_pointer(Address::new(2)) else {
            panic!("node not registered");
        };
        assert!(matches!(
            reader.read_data_address(handle, "next"),
            Err(ReadError::UnresolvedLocalPointer { .. })
        ));

        reader.relink(handle).unwrap();
        assert!(reader
            .issues()
            .iter()
            .any(|i| matches!(i, ReadIssue::UnresolvedPointer { .. })));
        let loaded = reader.finish();
        assert_eq!(
            loaded.block(handle).unwrap().link(0),
            Some(LocalLink::Unresolved(Address::new(1)))
        );
    }

    #[test]
    fn relink_patches_the_whole_entity() {
        let catalog = catalog();
        let bytes = write_scene(&catalog, Endian::host().opposite());
        let mut reader = read(&catalog, &bytes);
        let mesh = reader.entity("MECube").unwrap();
        reader.relink(mesh).unwrap();
        assert!(reader.issues().is_empty(), "{:?}", reader.issues());

        let doc = reader.finish();
        let verts = doc.follow(&catalog, mesh, "verts").unwrap().unwrap();
        let block = doc.block(verts).unwrap();
        assert!(block.is_settled());
        let first = f32::from_ne_slice(&block.data()[..4]);
        assert_eq!(first, VERTS[0][0]);

        let layers = doc.follow(&catalog, mesh, "layers").unwrap().unwrap();
        let elements = doc.pointer_array(layers).unwrap();
        assert_eq!(elements.len(), 2);
        for (i, token) in elements.iter().enumerate() {
            let target = doc.resolve(*token).unwrap();
            assert_eq!(
                doc.block(layers).unwrap().link(i * POINTER_SIZE),
                Some(LocalLink::Block(target))
            );
            let value = doc.view(&catalog, target).unwrap().get::<i32>("value").unwrap();
            assert_eq!(value, 100 + i as i32);
        }
    }

    #[test]
    fn catalog_mismatch_rejected() {
        let catalog = catalog();
        let bytes = write_scene(&catalog, Endian::host());
        let other = relink_core::TypeCatalogBuilder::new()
            .define(
                relink_core::StructDefinition::new("Other")
                    .primitive("x", relink_core::Primitive::I32),
            )
            .build()
            .unwrap();
        assert!(matches!(
            DataReader::new(&other, Document::from_bytes(&bytes).unwrap()),
            Err(ReadError::CatalogMismatch { .. })
        ));
    }

    #[test]
    fn list_cycle_is_detected() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, WriteOptions::new("cyc")).unwrap();
        let node = writer.struct_id("Node").unwrap();
        let a = Address::new(0xa0);
        let b = Address::new(0xb0);
        // written directly, bypassing the list walker's own guard
        writer.write_struct(node, a, &node_value(&catalog, 1, 0.0, b).into_bytes()).unwrap();
        writer.write_struct(node, b, &node_value(&catalog, 2, 0.0, a).into_bytes()).unwrap();
        let mesh_desc = catalog.descriptor_by_name("Mesh").unwrap();
        let mut mesh = relink_core::StructValue::new(mesh_desc);
        mesh.set_list_base("nodes", ListBase::new(a, b)).unwrap();
        let mesh_id = writer.struct_id("Mesh").unwrap();
        writer.write_entity(mesh_id, Address::new(0xc0), "MELoop", &mesh.into_bytes()).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = read(&catalog, &bytes);
        let owner = reader.entity("MELoop").unwrap();
        let mut noop = |_: &mut DataReader<'_>, _: BlockHandle| -> Result<(), ReadError> { Ok(()) };
        assert!(matches!(
            reader.read_list(owner, "nodes", &mut noop),
            Err(ReadError::ListCycle { .. })
        ));

        reader.relink(owner).unwrap();
        assert!(reader
            .issues()
            .iter()
            .any(|i| matches!(i, ReadIssue::BrokenList { .. })));
    }

    #[test]
    fn short_array_read_is_out_of_bounds() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, WriteOptions::new("short")).unwrap();
        writer.write_f64_array(Address::new(5), &[1.0, 2.0]).unwrap();
        let bytes = writer.finish().unwrap();
        let mut reader = read(&catalog, &bytes);
        assert!(matches!(
            reader.read_f64_array(Address::new(1), 3),
            Err(ReadError::ArrayOutOfBounds { .. })
        ));
        assert_eq!(reader.read_f64_array(Address::NULL, 3).unwrap(), None);
    }

    #[test]
    fn overflowing_array_length_is_an_error() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, WriteOptions::new("huge")).unwrap();
        writer.write_f32x3_array(Address::new(5), &VERTS).unwrap();
        let bytes = writer.finish().unwrap();
        let mut reader = read(&catalog, &bytes);
        assert!(matches!(
            reader.read_f32x3_array(Address::new(1), usize::MAX / 2),
            Err(ReadError::ArrayOverflow { width: 12, .. })
        ));
        assert!(matches!(
            reader.read_f64_array(Address::new(1), usize::MAX / 4),
            Err(ReadError::ArrayOverflow { width: 8, .. })
        ));
        let verts = reader.read_f32x3_array(Address::new(1), 3).unwrap().unwrap();
        assert_eq!(verts, VERTS.to_vec());
    }
}
