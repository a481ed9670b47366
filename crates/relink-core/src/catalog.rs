//! The struct-type catalog.
//!
//! Maps struct names to small stable ids and exposes the flattened field
//! layout of each struct: where its pointer slots are, which fields need
//! byte swapping, and how large one instance is. The catalog is built once
//! and is read-only afterwards; callers that write many instances of one
//! type resolve its [`StructId`] once and reuse it.
//!
//! Layouts are packed in declaration order. Pointers occupy 8-byte slots,
//! list bases two of them (`first`, `last`). Inline struct members are
//! flattened into dotted field names (`id.name`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{content_hash, ContentHash};

/// Size of a pointer slot in every layout.
pub const POINTER_SIZE: usize = 8;

/// Errors raised by catalog construction and catalog-driven field access.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown struct: {0}")]
    UnknownStruct(String),

    #[error("unknown struct id: {0}")]
    UnknownStructId(StructId),

    #[error("duplicate struct: {0}")]
    DuplicateStruct(String),

    #[error("struct '{strukt}' has no field '{field}'")]
    UnknownField { strukt: String, field: String },

    #[error("duplicate field '{field}' in struct '{strukt}'")]
    DuplicateField { strukt: String, field: String },

    #[error("field '{field}' of '{strukt}' is {actual}, not {expected}")]
    FieldKind {
        strukt: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("index {index} out of range for field '{field}' ({count} elements)")]
    IndexOutOfRange {
        field: String,
        index: usize,
        count: usize,
    },

    #[error("struct '{strukt}' is {expected} bytes, got {actual}")]
    SizeMismatch {
        strukt: String,
        expected: usize,
        actual: usize,
    },

    #[error("string of {len} bytes does not fit field '{field}' ({capacity} bytes)")]
    StringTooLong {
        field: String,
        len: usize,
        capacity: usize,
    },

    #[error("too many structs in catalog")]
    Overflow,

    #[error("field '{field}' of '{strukt}' overflows the struct size")]
    SizeOverflow { strukt: String, field: String },

    #[error("catalog definition error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Small integer identifying a struct type within one catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructId(pub u16);

impl StructId {
    /// Marker stored on the stream for raw (untyped) records.
    pub const RAW: u16 = u16::MAX;
}

impl std::fmt::Display for StructId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primitive scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    /// Width in bytes.
    pub fn width(self) -> usize {
        match self {
            Primitive::Char | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Char => "char",
            Primitive::I8 => "i8",
            Primitive::U8 => "u8",
            Primitive::I16 => "i16",
            Primitive::U16 => "u16",
            Primitive::I32 => "i32",
            Primitive::U32 => "u32",
            Primitive::I64 => "i64",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }
}

/// What a local data pointer points at.
///
/// Struct targets are self-describing on the stream; array targets tell the
/// reader how to correct the byte order of the raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerTarget {
    Struct,
    Array(Primitive),
    PointerArray,
    Raw,
}

/// Resolved kind of a leaf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Primitive(Primitive),
    Pointer(PointerTarget),
    EntityPointer,
    ListBase,
}

impl FieldKind {
    /// Bytes occupied by one element of this kind.
    pub fn width(self) -> usize {
        match self {
            FieldKind::Primitive(p) => p.width(),
            FieldKind::Pointer(_) | FieldKind::EntityPointer => POINTER_SIZE,
            FieldKind::ListBase => 2 * POINTER_SIZE,
        }
    }

    /// Unit of byte swapping within one element.
    pub fn swap_width(self) -> usize {
        match self {
            FieldKind::Primitive(p) => p.width(),
            _ => POINTER_SIZE,
        }
    }

    pub fn describe(self) -> String {
        match self {
            FieldKind::Primitive(p) => p.name().to_string(),
            FieldKind::Pointer(_) => "pointer".to_string(),
            FieldKind::EntityPointer => "entity pointer".to_string(),
            FieldKind::ListBase => "list base".to_string(),
        }
    }
}

/// A flattened leaf field of a struct layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Byte offset within one struct instance.
    pub offset: usize,
    /// Number of elements (1 for scalars).
    pub count: usize,
}

impl FieldDescriptor {
    /// Total bytes occupied by the field.
    pub fn size(&self) -> usize {
        self.kind.width() * self.count
    }

    /// Byte offset of element `index`, relative to the struct start.
    pub fn element_offset(&self, index: usize) -> usize {
        self.offset + index * self.kind.width()
    }
}

/// Layout of one struct type.
#[derive(Debug, Clone, Serialize)]
pub struct StructDescriptor {
    pub id: StructId,
    pub name: String,
    pub size: usize,
    pub fields: Vec<FieldDescriptor>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl StructDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Look up a field, failing with [`CatalogError::UnknownField`].
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor, CatalogError> {
        self.field(name).ok_or_else(|| CatalogError::UnknownField {
            strukt: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Offsets of every pointer-sized slot holding an identity token, with
    /// the field each belongs to. List bases contribute two slots.
    pub fn pointer_slots(&self) -> impl Iterator<Item = (usize, &FieldDescriptor)> + '_ {
        self.fields
            .iter()
            .filter(|f| !matches!(f.kind, FieldKind::Primitive(_)))
            .flat_map(|f| {
                let slots = f.size() / POINTER_SIZE;
                (0..slots).map(move |i| (f.offset + i * POINTER_SIZE, f))
            })
    }

    /// Whether any field carries an entity pointer.
    pub fn has_entity_pointers(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.kind == FieldKind::EntityPointer)
    }
}

/// Field kind as written in a definition; `inline` embeds another struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "snake_case")]
pub enum FieldSpec {
    Primitive(Primitive),
    Pointer(PointerTarget),
    EntityPointer,
    ListBase,
    Inline(String),
}

/// A field as declared in a struct definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub spec: FieldSpec,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// A struct definition supplied by the external type-reflection layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl StructDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, spec: FieldSpec, count: usize) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            spec,
            count,
        });
        self
    }

    pub fn primitive(self, name: impl Into<String>, ty: Primitive) -> Self {
        self.push(name, FieldSpec::Primitive(ty), 1)
    }

    /// Fixed-length inline array of a primitive.
    pub fn array(self, name: impl Into<String>, ty: Primitive, count: usize) -> Self {
        self.push(name, FieldSpec::Primitive(ty), count)
    }

    /// Fixed-length character buffer.
    pub fn chars(self, name: impl Into<String>, len: usize) -> Self {
        self.push(name, FieldSpec::Primitive(Primitive::Char), len)
    }

    pub fn pointer(self, name: impl Into<String>, target: PointerTarget) -> Self {
        self.push(name, FieldSpec::Pointer(target), 1)
    }

    pub fn entity_pointer(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpec::EntityPointer, 1)
    }

    pub fn list_base(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpec::ListBase, 1)
    }

    /// Embed a previously defined struct, flattening its fields.
    pub fn inline(self, name: impl Into<String>, strukt: impl Into<String>) -> Self {
        self.push(name, FieldSpec::Inline(strukt.into()), 1)
    }
}

/// Serialized form of a whole catalog (`{"structs": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDefinition {
    #[serde(default)]
    pub structs: Vec<StructDefinition>,
}

/// Fluent builder for a [`TypeCatalog`].
#[derive(Debug, Default)]
pub struct TypeCatalogBuilder {
    definitions: Vec<StructDefinition>,
}

impl TypeCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, definition: StructDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> Result<TypeCatalog, CatalogError> {
        TypeCatalog::from_definitions(self.definitions)
    }
}

/// Registry of struct layouts, indexed by name and by id.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    structs: Vec<StructDescriptor>,
    by_name: HashMap<String, StructId>,
    fingerprint: ContentHash,
}

impl TypeCatalog {
    /// Build a catalog from definitions. Inline members may only refer to
    /// structs defined earlier in the list.
    pub fn from_definitions(definitions: Vec<StructDefinition>) -> Result<Self, CatalogError> {
        let mut structs: Vec<StructDescriptor> = Vec::with_capacity(definitions.len());
        let mut by_name: HashMap<String, StructId> = HashMap::new();

        for def in definitions {
            if by_name.contains_key(&def.name) {
                return Err(CatalogError::DuplicateStruct(def.name));
            }
            let id = u16::try_from(structs.len())
                .map(StructId)
                .map_err(|_| CatalogError::Overflow)?;
            if id.0 == StructId::RAW {
                return Err(CatalogError::Overflow);
            }

            let mut fields = Vec::new();
            let mut offset = 0usize;
            for field in &def.fields {
                let overflow = || CatalogError::SizeOverflow {
                    strukt: def.name.clone(),
                    field: field.name.clone(),
                };
                let kind = match &field.spec {
                    FieldSpec::Primitive(p) => FieldKind::Primitive(*p),
                    FieldSpec::Pointer(t) => FieldKind::Pointer(*t),
                    FieldSpec::EntityPointer => FieldKind::EntityPointer,
                    FieldSpec::ListBase => FieldKind::ListBase,
                    FieldSpec::Inline(inner) => {
                        let inner_id = by_name
                            .get(inner)
                            .copied()
                            .ok_or_else(|| CatalogError::UnknownStruct(inner.clone()))?;
                        let inner_desc: &StructDescriptor = &structs[inner_id.0 as usize];
                        inner_desc
                            .size
                            .checked_mul(field.count)
                            .and_then(|total| offset.checked_add(total))
                            .ok_or_else(overflow)?;
                        for element in 0..field.count {
                            let prefix = if field.count == 1 {
                                field.name.clone()
                            } else {
                                format!("{}[{element}]", field.name)
                            };
                            for leaf in &inner_desc.fields {
                                fields.push(FieldDescriptor {
                                    name: format!("{prefix}.{}", leaf.name),
                                    kind: leaf.kind,
                                    offset: offset + leaf.offset,
                                    count: leaf.count,
                                });
                            }
                            offset += inner_desc.size;
                        }
                        continue;
                    }
                };
                let end = kind
                    .width()
                    .checked_mul(field.count)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or_else(overflow)?;
                fields.push(FieldDescriptor {
                    name: field.name.clone(),
                    kind,
                    offset,
                    count: field.count,
                });
                offset = end;
            }

            let mut index = HashMap::with_capacity(fields.len());
            for (i, f) in fields.iter().enumerate() {
                if index.insert(f.name.clone(), i).is_some() {
                    return Err(CatalogError::DuplicateField {
                        strukt: def.name.clone(),
                        field: f.name.clone(),
                    });
                }
            }

            by_name.insert(def.name.clone(), id);
            structs.push(StructDescriptor {
                id,
                name: def.name,
                size: offset,
                fields,
                index,
            });
        }

        let fingerprint = content_hash(&structs)?;
        Ok(Self {
            structs,
            by_name,
            fingerprint,
        })
    }

    /// Parse a JSON [`CatalogDefinition`] and build the catalog.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definition: CatalogDefinition = serde_json::from_str(json)?;
        Self::from_definitions(definition.structs)
    }

    pub fn id_for_name(&self, name: &str) -> Result<StructId, CatalogError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownStruct(name.to_string()))
    }

    /// Direct table index by id.
    pub fn descriptor(&self, id: StructId) -> Result<&StructDescriptor, CatalogError> {
        self.structs
            .get(id.0 as usize)
            .ok_or(CatalogError::UnknownStructId(id))
    }

    pub fn descriptor_by_name(&self, name: &str) -> Result<&StructDescriptor, CatalogError> {
        self.descriptor(self.id_for_name(name)?)
    }

    /// SHA-256 over the canonical layout of every struct.
    pub fn fingerprint(&self) -> &ContentHash {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructDescriptor> {
        self.structs.iter()
    }
}
