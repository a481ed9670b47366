//! Record writer.
//!
//! The writer never stores a source address. Every address it sees, whether
//! as a record identity or as the value of a pointer slot, is replaced by a
//! session token from its [`TokenTable`], so equal addresses share a token and
//! distinct addresses never do.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use relink_core::{
    swap_elements, swap_struct, Address, DocumentId, Endian, EntityMeta, FieldKind, ListBase,
    Scalar, StructDescriptor, StructId, TypeCatalog, POINTER_SIZE,
};

use crate::error::WriteError;
use crate::format::{self, DocumentFlags, RecordKind, RECORD_HEADER_SIZE};

/// Options fixed for the lifetime of a write session.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub document: DocumentId,
    /// Byte order of the produced document. Defaults to the host order.
    pub endian: Endian,
    /// Transient save: callers may skip data that can be rebuilt.
    pub undo: bool,
}

impl WriteOptions {
    pub fn new(document: impl Into<DocumentId>) -> Self {
        Self {
            document: document.into(),
            endian: Endian::host(),
            undo: false,
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn undo(mut self, undo: bool) -> Self {
        self.undo = undo;
        self
    }
}

/// Host memory holding list nodes, looked up by their source address.
pub trait NodeMemory {
    fn node(&self, address: Address) -> Option<&[u8]>;
}

impl NodeMemory for HashMap<Address, Vec<u8>> {
    fn node(&self, address: Address) -> Option<&[u8]> {
        self.get(&address).map(Vec::as_slice)
    }
}

impl NodeMemory for BTreeMap<Address, Vec<u8>> {
    fn node(&self, address: Address) -> Option<&[u8]> {
        self.get(&address).map(Vec::as_slice)
    }
}

/// Session-scoped translation of source addresses to tokens.
#[derive(Debug, Default)]
struct TokenTable {
    tokens: HashMap<Address, Address>,
    written: HashSet<Address>,
    next: u64,
}

impl TokenTable {
    fn token(&mut self, address: Address) -> Address {
        if address.is_null() {
            return Address::NULL;
        }
        let next = &mut self.next;
        *self.tokens.entry(address).or_insert_with(|| {
            *next += 1;
            Address::new(*next)
        })
    }

    fn mark_written(&mut self, token: Address) {
        self.written.insert(token);
    }

    /// Tokens handed out for pointer values whose target was never written.
    fn dangling(&self) -> usize {
        self.tokens
            .values()
            .filter(|token| !self.written.contains(token))
            .count()
    }
}

/// Appends tagged records for a struct graph to `out`.
pub struct Writer<'c, W: Write> {
    out: W,
    catalog: &'c TypeCatalog,
    options: WriteOptions,
    hasher: Sha256,
    position: u64,
    records: usize,
    tokens: TokenTable,
}

impl<'c> Writer<'c, Vec<u8>> {
    /// A writer collecting the document in memory.
    pub fn to_vec(catalog: &'c TypeCatalog, options: WriteOptions) -> Result<Self, WriteError> {
        Writer::new(Vec::new(), catalog, options)
    }
}

impl<'c, W: Write> Writer<'c, W> {
    /// Start a session and emit the document header.
    pub fn new(
        out: W,
        catalog: &'c TypeCatalog,
        options: WriteOptions,
    ) -> Result<Self, WriteError> {
        let mut flags = DocumentFlags::NONE;
        if options.undo {
            flags.set(DocumentFlags::UNDO);
        }
        let header = format::encode_header(
            flags,
            options.endian,
            catalog.fingerprint(),
            &options.document,
        )?;
        debug!(
            document = %options.document,
            endian = %options.endian,
            undo = options.undo,
            "starting write session"
        );
        let mut writer = Self {
            out,
            catalog,
            options,
            hasher: Sha256::new(),
            position: 0,
            records: 0,
            tokens: TokenTable::default(),
        };
        writer.emit(&header)?;
        Ok(writer)
    }

    /// Resolve a struct name once; reuse the id inside loops.
    pub fn struct_id(&self, name: &str) -> Result<StructId, WriteError> {
        Ok(self.catalog.id_for_name(name)?)
    }

    /// Whether this is a transient (undo) save.
    pub fn is_undo(&self) -> bool {
        self.options.undo
    }

    pub fn endian(&self) -> Endian {
        self.options.endian
    }

    /// Bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn write_struct(
        &mut self,
        id: StructId,
        address: Address,
        data: &[u8],
    ) -> Result<(), WriteError> {
        self.write_struct_array(id, 1, address, data)
    }

    pub fn write_struct_by_name(
        &mut self,
        name: &str,
        address: Address,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let id = self.struct_id(name)?;
        self.write_struct(id, address, data)
    }

    /// `count` contiguous instances starting at `address`, as one record.
    pub fn write_struct_array(
        &mut self,
        id: StructId,
        count: usize,
        address: Address,
        data: &[u8],
    ) -> Result<(), WriteError> {
        if address.is_null() || count == 0 {
            return Ok(());
        }
        let catalog = self.catalog;
        let desc = catalog.descriptor(id)?;
        let payload = self.encode_structs(desc, count, data)?;
        self.write_record(RecordKind::Data, id.0, address, count, None, &payload)
    }

    pub fn write_struct_array_by_name(
        &mut self,
        name: &str,
        count: usize,
        address: Address,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let id = self.struct_id(name)?;
        self.write_struct_array(id, count, address, data)
    }

    /// Write every node of `list` head to tail, following each node's `next`
    /// field through `memory`. Each node becomes one record identified by its
    /// own address.
    ///
    /// The whole chain is checked before the first node is emitted; a cycle,
    /// a gap or a mis-sized node leaves the stream untouched.
    pub fn write_struct_list<M: NodeMemory + ?Sized>(
        &mut self,
        id: StructId,
        list: ListBase,
        memory: &M,
    ) -> Result<(), WriteError> {
        let catalog = self.catalog;
        let desc = catalog.descriptor(id)?;
        let next = desc.require_field("next")?;
        if !matches!(next.kind, FieldKind::Pointer(_)) {
            return Err(relink_core::CatalogError::FieldKind {
                strukt: desc.name.clone(),
                field: next.name.clone(),
                expected: "pointer".to_string(),
                actual: next.kind.describe(),
            }
            .into());
        }
        let next_offset = next.offset;

        let mut visited = HashSet::new();
        let mut current = list.first;
        let mut nodes = Vec::new();
        while !current.is_null() {
            if !visited.insert(current) {
                return Err(WriteError::ListCycle { address: current });
            }
            let data = memory
                .node(current)
                .ok_or(WriteError::MissingListNode { address: current })?;
            if data.len() != desc.size {
                return Err(WriteError::SizeMismatch {
                    strukt: desc.name.clone(),
                    expected: desc.size,
                    actual: data.len(),
                });
            }
            let following = Address::new(u64::from_ne_slice(
                &data[next_offset..next_offset + POINTER_SIZE],
            ));
            nodes.push((current, data));
            current = following;
        }

        for (address, data) in &nodes {
            self.write_struct(id, *address, data)?;
        }
        trace!(strukt = %desc.name, nodes = nodes.len(), "wrote list");
        Ok(())
    }

    pub fn write_struct_list_by_name<M: NodeMemory + ?Sized>(
        &mut self,
        name: &str,
        list: ListBase,
        memory: &M,
    ) -> Result<(), WriteError> {
        let id = self.struct_id(name)?;
        self.write_struct_list(id, list, memory)
    }

    /// A top-level entity owned by this document.
    pub fn write_entity(
        &mut self,
        id: StructId,
        address: Address,
        name: &str,
        data: &[u8],
    ) -> Result<(), WriteError> {
        if address.is_null() {
            return Ok(());
        }
        let catalog = self.catalog;
        let desc = catalog.descriptor(id)?;
        let payload = self.encode_structs(desc, 1, data)?;
        let meta = EntityMeta::local(name);
        self.write_record(RecordKind::Entity, id.0, address, 1, Some(&meta), &payload)
    }

    /// A placeholder standing for entity `name` of document `library`.
    ///
    /// Pointers to `address` elsewhere in this session resolve to the
    /// library's entity when the document is linked.
    pub fn write_linked_entity(
        &mut self,
        id: StructId,
        address: Address,
        name: &str,
        library: &DocumentId,
    ) -> Result<(), WriteError> {
        if address.is_null() {
            return Ok(());
        }
        self.catalog.descriptor(id)?;
        let meta = EntityMeta::linked(name, library.clone());
        self.write_record(RecordKind::Link, id.0, address, 1, Some(&meta), &[])
    }

    /// An untyped buffer, written verbatim.
    pub fn write_raw(&mut self, address: Address, data: &[u8]) -> Result<(), WriteError> {
        if address.is_null() || data.is_empty() {
            return Ok(());
        }
        self.write_record(RecordKind::Raw, StructId::RAW, address, data.len(), None, data)
    }

    pub fn write_i32_array(&mut self, address: Address, values: &[i32]) -> Result<(), WriteError> {
        self.write_scalars(address, values)
    }

    pub fn write_u32_array(&mut self, address: Address, values: &[u32]) -> Result<(), WriteError> {
        self.write_scalars(address, values)
    }

    pub fn write_f32_array(&mut self, address: Address, values: &[f32]) -> Result<(), WriteError> {
        self.write_scalars(address, values)
    }

    pub fn write_f32x3_array(
        &mut self,
        address: Address,
        values: &[[f32; 3]],
    ) -> Result<(), WriteError> {
        let flat: Vec<f32> = values.iter().flatten().copied().collect();
        self.write_scalars(address, &flat)
    }

    pub fn write_f64_array(&mut self, address: Address, values: &[f64]) -> Result<(), WriteError> {
        self.write_scalars(address, values)
    }

    /// An array of pointers; each element is translated to its token.
    pub fn write_pointer_array(
        &mut self,
        address: Address,
        values: &[Address],
    ) -> Result<(), WriteError> {
        if address.is_null() {
            return Ok(());
        }
        let tokens: Vec<u64> = values.iter().map(|a| self.tokens.token(*a).get()).collect();
        self.write_scalars(address, &tokens)
    }

    /// A NUL-terminated string.
    pub fn write_string(&mut self, address: Address, value: &str) -> Result<(), WriteError> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.write_raw(address, &bytes)
    }

    /// Emit the end record and the content hash, returning the sink.
    pub fn finish(mut self) -> Result<W, WriteError> {
        let mut end = Vec::with_capacity(RECORD_HEADER_SIZE);
        format::encode_record_header(
            &mut end,
            self.options.endian,
            RecordKind::End,
            0,
            Address::NULL,
            0,
            0,
        );
        self.emit(&end)?;

        let dangling = self.tokens.dangling();
        debug!(
            document = %self.options.document,
            records = self.records,
            bytes = self.position,
            dangling,
            "finished write session"
        );

        let Writer {
            mut out, hasher, ..
        } = self;
        let hash: [u8; 32] = hasher.finalize().into();
        out.write_all(&hash)?;
        out.flush()?;
        Ok(out)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Host-order instances to session-order payload with tokenized pointers.
    fn encode_structs(
        &mut self,
        desc: &StructDescriptor,
        count: usize,
        data: &[u8],
    ) -> Result<Vec<u8>, WriteError> {
        let expected = desc.size * count;
        if data.len() != expected {
            return Err(WriteError::SizeMismatch {
                strukt: desc.name.clone(),
                expected,
                actual: data.len(),
            });
        }
        let mut payload = data.to_vec();
        for element in 0..count {
            let base = element * desc.size;
            for (offset, _) in desc.pointer_slots() {
                let slot = &mut payload[base + offset..base + offset + POINTER_SIZE];
                let token = self.tokens.token(Address::new(u64::from_ne_slice(slot)));
                token.get().write_ne_slice(slot);
            }
        }
        if !self.options.endian.is_host() {
            swap_struct(desc, &mut payload, count);
        }
        Ok(payload)
    }

    fn write_scalars<T: Scalar>(
        &mut self,
        address: Address,
        values: &[T],
    ) -> Result<(), WriteError> {
        if address.is_null() || values.is_empty() {
            return Ok(());
        }
        let width = T::PRIMITIVE.width();
        let mut payload = vec![0u8; values.len() * width];
        for (value, slot) in values.iter().zip(payload.chunks_exact_mut(width)) {
            value.write_ne_slice(slot);
        }
        if !self.options.endian.is_host() {
            swap_elements(&mut payload, width);
        }
        self.write_record(
            RecordKind::Raw,
            StructId::RAW,
            address,
            payload.len(),
            None,
            &payload,
        )
    }

    fn write_record(
        &mut self,
        kind: RecordKind,
        struct_id: u16,
        address: Address,
        count: usize,
        meta: Option<&EntityMeta>,
        payload: &[u8],
    ) -> Result<(), WriteError> {
        let endian = self.options.endian;
        let token = self.tokens.token(address);
        self.tokens.mark_written(token);

        let mut body = Vec::with_capacity(payload.len());
        if let Some(meta) = meta {
            format::encode_entity_meta(&mut body, endian, meta)?;
        }
        body.extend_from_slice(payload);
        let too_large = |_| WriteError::RecordTooLarge { len: body.len() };
        let length = u32::try_from(body.len()).map_err(too_large)?;
        let count = u32::try_from(count).map_err(too_large)?;

        let mut head = Vec::with_capacity(RECORD_HEADER_SIZE);
        format::encode_record_header(&mut head, endian, kind, struct_id, token, count, length);
        self.emit(&head)?;
        self.emit(&body)?;
        self.records += 1;
        trace!(kind = kind.name(), identity = %token, bytes = length, "record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Document;
    use crate::testing::{catalog, mesh_value, node_value};
    use relink_core::FieldAccess;

    fn options() -> WriteOptions {
        WriteOptions::new("scene")
    }

    #[test]
    fn null_address_writes_nothing() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        let id = writer.struct_id("Node").unwrap();
        let data = node_value(&catalog, 1, 0.5, Address::NULL).into_bytes();
        let before = writer.position();

        writer.write_struct(id, Address::NULL, &data).unwrap();
        writer.write_raw(Address::NULL, &[1, 2, 3]).unwrap();
        writer.write_i32_array(Address::NULL, &[1]).unwrap();
        writer.write_string(Address::NULL, "x").unwrap();
        writer.write_struct_array(id, 0, Address::new(0x10), &[]).unwrap();

        assert_eq!(writer.records_written(), 0);
        assert_eq!(writer.position(), before);
    }

    #[test]
    fn unknown_struct_name_fails() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        assert!(matches!(
            writer.write_struct_by_name("Lamp", Address::new(1), &[]),
            Err(WriteError::Catalog(relink_core::CatalogError::UnknownStruct(_)))
        ));
    }

    #[test]
    fn size_mismatch_fails() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        let id = writer.struct_id("Node").unwrap();
        assert!(matches!(
            writer.write_struct(id, Address::new(1), &[0u8; 3]),
            Err(WriteError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn distinct_addresses_get_distinct_tokens() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        writer.write_raw(Address::new(0x7f00_1000), &[1]).unwrap();
        writer.write_raw(Address::new(0x7f00_2000), &[2]).unwrap();
        writer.write_raw(Address::new(0x7f00_1000), &[3]).unwrap();
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();

        let ids: Vec<u64> = doc.records.iter().map(|r| r.identity.get()).collect();
        assert_eq!(ids, vec![1, 2, 1]);
    }

    #[test]
    fn pointer_slots_carry_tokens() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        let id = writer.struct_id("Node").unwrap();
        let target = Address::new(0xdead_0000);
        let data = node_value(&catalog, 5, 1.0, target).into_bytes();
        writer.write_struct(id, Address::new(0xbeef_0000), &data).unwrap();
        let tail = node_value(&catalog, 6, 2.0, Address::NULL).into_bytes();
        writer.write_struct(id, target, &tail).unwrap();
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();

        let desc = catalog.descriptor(id).unwrap();
        let first = relink_core::StructRef::new(desc, &doc.records[0].payload).unwrap();
        assert_eq!(first.pointer("next").unwrap(), doc.records[1].identity);
        assert_eq!(first.get::<i32>("value").unwrap(), 5);
    }

    #[test]
    fn list_walk_rejects_cycles_and_gaps() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        let id = writer.struct_id("Node").unwrap();

        let a = Address::new(0x100);
        let b = Address::new(0x200);
        let c = Address::new(0x300);
        let mut memory = HashMap::new();
        memory.insert(a, node_value(&catalog, 1, 0.0, b).into_bytes());
        memory.insert(b, node_value(&catalog, 2, 0.0, a).into_bytes());
        let (records, position) = (writer.records_written(), writer.position());
        assert!(matches!(
            writer.write_struct_list(id, ListBase::new(a, b), &memory),
            Err(WriteError::ListCycle { .. })
        ));
        assert_eq!(writer.records_written(), records);
        assert_eq!(writer.position(), position);

        memory.insert(b, node_value(&catalog, 2, 0.0, c).into_bytes());
        assert!(matches!(
            writer.write_struct_list(id, ListBase::new(a, b), &memory),
            Err(WriteError::MissingListNode { .. })
        ));
        assert_eq!(writer.records_written(), records);
        assert_eq!(writer.position(), position);

        // rejected lists allocated no tokens
        memory.insert(c, node_value(&catalog, 3, 0.0, Address::NULL).into_bytes());
        writer
            .write_struct_list(id, ListBase::new(a, c), &memory)
            .unwrap();
        assert_eq!(writer.records_written(), records + 3);
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();
        let mut identities: Vec<u64> = doc.records.iter().map(|r| r.identity.get()).collect();
        identities.sort_unstable();
        assert_eq!(identities, vec![1, 2, 3]);
    }

    #[test]
    fn undo_flag_is_recorded() {
        let catalog = catalog();
        let writer = Writer::to_vec(&catalog, options().undo(true)).unwrap();
        assert!(writer.is_undo());
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();
        assert!(doc.header.is_undo());
        assert!(doc.records.is_empty());
    }

    #[test]
    fn entity_records_carry_meta() {
        let catalog = catalog();
        let mut writer = Writer::to_vec(&catalog, options()).unwrap();
        let mesh = writer.struct_id("Mesh").unwrap();
        let material = writer.struct_id("Material").unwrap();
        let data = mesh_value(&catalog, "MECube", Address::NULL, Address::NULL).into_bytes();
        writer.write_entity(mesh, Address::new(0x10), "MECube", &data).unwrap();
        writer
            .write_linked_entity(material, Address::new(0x20), "MAStone", &DocumentId::new("lib"))
            .unwrap();
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();

        assert_eq!(doc.records[0].kind, RecordKind::Entity);
        assert_eq!(doc.records[0].entity, Some(EntityMeta::local("MECube")));
        assert_eq!(doc.records[1].kind, RecordKind::Link);
        assert_eq!(
            doc.records[1].entity,
            Some(EntityMeta::linked("MAStone", DocumentId::new("lib")))
        );
    }

    #[test]
    fn foreign_order_swaps_typed_arrays_only() {
        let catalog = catalog();
        let endian = Endian::Big;
        let mut writer = Writer::to_vec(&catalog, options().endian(endian)).unwrap();
        writer.write_i32_array(Address::new(1), &[1, 256, 65536]).unwrap();
        writer.write_raw(Address::new(2), &[1, 2, 3, 4]).unwrap();
        let doc = Document::from_bytes(&writer.finish().unwrap()).unwrap();

        assert_eq!(doc.header.endian, Endian::Big);
        assert_eq!(
            doc.records[0].payload,
            vec![0, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0]
        );
        assert_eq!(doc.records[1].payload, vec![1, 2, 3, 4]);
    }
}
