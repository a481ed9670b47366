//! Typed access to struct instances laid out by the catalog.
//!
//! Instance bytes are always in host byte order: writers hand host-order
//! memory to the engine and readers correct the byte order before exposing a
//! block. Pointer slots hold identity tokens.

use crate::address::Address;
use crate::catalog::{
    CatalogError, FieldDescriptor, FieldKind, Primitive, StructDescriptor, POINTER_SIZE,
};

/// A primitive that can be stored in a catalog field or typed array.
pub trait Scalar: Copy {
    const PRIMITIVE: Primitive;

    /// Decode from exactly `PRIMITIVE.width()` host-order bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;

    /// Encode into exactly `PRIMITIVE.width()` host-order bytes.
    fn write_ne_slice(self, out: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($ty:ty => $prim:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const PRIMITIVE: Primitive = Primitive::$prim;

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }

                fn write_ne_slice(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// The `{first, last}` pair stored in a list-base field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListBase {
    pub first: Address,
    pub last: Address,
}

impl ListBase {
    pub fn new(first: Address, last: Address) -> Self {
        Self { first, last }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_null()
    }
}

fn kind_error(desc: &StructDescriptor, field: &FieldDescriptor, expected: &str) -> CatalogError {
    CatalogError::FieldKind {
        strukt: desc.name.clone(),
        field: field.name.clone(),
        expected: expected.to_string(),
        actual: field.kind.describe(),
    }
}

fn scalar_matches<T: Scalar>(kind: FieldKind) -> bool {
    match kind {
        FieldKind::Primitive(p) => {
            p == T::PRIMITIVE || (p == Primitive::Char && T::PRIMITIVE == Primitive::U8)
        }
        _ => false,
    }
}

/// Locate element `index` of `name`, checking that the field passes `check`.
fn locate<'d>(
    desc: &'d StructDescriptor,
    name: &str,
    index: usize,
    check: impl Fn(FieldKind) -> bool,
    expected: &str,
) -> Result<(usize, &'d FieldDescriptor), CatalogError> {
    let field = desc.require_field(name)?;
    if !check(field.kind) {
        return Err(kind_error(desc, field, expected));
    }
    if index >= field.count {
        return Err(CatalogError::IndexOutOfRange {
            field: field.name.clone(),
            index,
            count: field.count,
        });
    }
    Ok((field.element_offset(index), field))
}

fn read_token(bytes: &[u8], offset: usize) -> Address {
    Address::new(u64::from_ne_slice(&bytes[offset..offset + POINTER_SIZE]))
}

/// Read access to a struct instance, shared by owned and borrowed views.
pub trait FieldAccess {
    fn descriptor(&self) -> &StructDescriptor;

    /// Raw instance bytes in host byte order.
    fn bytes(&self) -> &[u8];

    fn get<T: Scalar>(&self, field: &str) -> Result<T, CatalogError> {
        self.get_at(field, 0)
    }

    /// Element `index` of a primitive array field.
    fn get_at<T: Scalar>(&self, field: &str, index: usize) -> Result<T, CatalogError> {
        let (offset, _) = locate(
            self.descriptor(),
            field,
            index,
            scalar_matches::<T>,
            T::PRIMITIVE.name(),
        )?;
        Ok(T::from_ne_slice(
            &self.bytes()[offset..offset + T::PRIMITIVE.width()],
        ))
    }

    /// Every element of a primitive array field.
    fn get_array<T: Scalar>(&self, field: &str) -> Result<Vec<T>, CatalogError> {
        let count = self.descriptor().require_field(field)?.count;
        (0..count).map(|i| self.get_at(field, i)).collect()
    }

    /// NUL-terminated contents of a `char` buffer.
    fn str(&self, field: &str) -> Result<String, CatalogError> {
        let desc = self.descriptor();
        let (offset, f) = locate(
            desc,
            field,
            0,
            |k| k == FieldKind::Primitive(Primitive::Char),
            "char",
        )?;
        let raw = &self.bytes()[offset..offset + f.count];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Token stored in a data or entity pointer field.
    fn pointer(&self, field: &str) -> Result<Address, CatalogError> {
        self.pointer_at(field, 0)
    }

    fn pointer_at(&self, field: &str, index: usize) -> Result<Address, CatalogError> {
        let (offset, _) = locate(
            self.descriptor(),
            field,
            index,
            |k| matches!(k, FieldKind::Pointer(_) | FieldKind::EntityPointer),
            "pointer",
        )?;
        Ok(read_token(self.bytes(), offset))
    }

    fn list_base(&self, field: &str) -> Result<ListBase, CatalogError> {
        let (offset, _) = locate(
            self.descriptor(),
            field,
            0,
            |k| k == FieldKind::ListBase,
            "list base",
        )?;
        Ok(ListBase {
            first: read_token(self.bytes(), offset),
            last: read_token(self.bytes(), offset + POINTER_SIZE),
        })
    }
}

/// Borrowed view of one struct instance.
#[derive(Debug, Clone, Copy)]
pub struct StructRef<'a> {
    descriptor: &'a StructDescriptor,
    bytes: &'a [u8],
}

impl<'a> StructRef<'a> {
    /// View `bytes` as an instance of `descriptor`.
    pub fn new(descriptor: &'a StructDescriptor, bytes: &'a [u8]) -> Result<Self, CatalogError> {
        if bytes.len() != descriptor.size {
            return Err(CatalogError::SizeMismatch {
                strukt: descriptor.name.clone(),
                expected: descriptor.size,
                actual: bytes.len(),
            });
        }
        Ok(Self { descriptor, bytes })
    }
}

impl FieldAccess for StructRef<'_> {
    fn descriptor(&self) -> &StructDescriptor {
        self.descriptor
    }

    fn bytes(&self) -> &[u8] {
        self.bytes
    }
}

/// An owned, zero-initialized struct instance with typed setters.
///
/// This is how callers prepare host memory for the writer.
#[derive(Debug, Clone)]
pub struct StructValue<'a> {
    descriptor: &'a StructDescriptor,
    bytes: Vec<u8>,
}

impl<'a> StructValue<'a> {
    pub fn new(descriptor: &'a StructDescriptor) -> Self {
        Self {
            descriptor,
            bytes: vec![0; descriptor.size],
        }
    }

    pub fn from_bytes(
        descriptor: &'a StructDescriptor,
        bytes: Vec<u8>,
    ) -> Result<Self, CatalogError> {
        StructRef::new(descriptor, &bytes)?;
        Ok(Self { descriptor, bytes })
    }

    pub fn view(&self) -> StructRef<'_> {
        StructRef {
            descriptor: self.descriptor,
            bytes: &self.bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn set<T: Scalar>(&mut self, field: &str, value: T) -> Result<&mut Self, CatalogError> {
        self.set_at(field, 0, value)
    }

    pub fn set_at<T: Scalar>(
        &mut self,
        field: &str,
        index: usize,
        value: T,
    ) -> Result<&mut Self, CatalogError> {
        let (offset, _) = locate(
            self.descriptor,
            field,
            index,
            scalar_matches::<T>,
            T::PRIMITIVE.name(),
        )?;
        value.write_ne_slice(&mut self.bytes[offset..offset + T::PRIMITIVE.width()]);
        Ok(self)
    }

    pub fn set_array<T: Scalar>(
        &mut self,
        field: &str,
        values: &[T],
    ) -> Result<&mut Self, CatalogError> {
        for (i, value) in values.iter().enumerate() {
            self.set_at(field, i, *value)?;
        }
        Ok(self)
    }

    /// Store `value` NUL-terminated in a `char` buffer.
    pub fn set_str(&mut self, field: &str, value: &str) -> Result<&mut Self, CatalogError> {
        let (offset, f) = locate(
            self.descriptor,
            field,
            0,
            |k| k == FieldKind::Primitive(Primitive::Char),
            "char",
        )?;
        if value.len() >= f.count {
            return Err(CatalogError::StringTooLong {
                field: f.name.clone(),
                len: value.len(),
                capacity: f.count,
            });
        }
        let slot = &mut self.bytes[offset..offset + f.count];
        slot.fill(0);
        slot[..value.len()].copy_from_slice(value.as_bytes());
        Ok(self)
    }

    pub fn set_pointer(
        &mut self,
        field: &str,
        address: Address,
    ) -> Result<&mut Self, CatalogError> {
        self.set_pointer_at(field, 0, address)
    }

    pub fn set_pointer_at(
        &mut self,
        field: &str,
        index: usize,
        address: Address,
    ) -> Result<&mut Self, CatalogError> {
        let (offset, _) = locate(
            self.descriptor,
            field,
            index,
            |k| matches!(k, FieldKind::Pointer(_) | FieldKind::EntityPointer),
            "pointer",
        )?;
        address
            .get()
            .write_ne_slice(&mut self.bytes[offset..offset + POINTER_SIZE]);
        Ok(self)
    }

    pub fn set_list_base(
        &mut self,
        field: &str,
        list: ListBase,
    ) -> Result<&mut Self, CatalogError> {
        let (offset, _) = locate(
            self.descriptor,
            field,
            0,
            |k| k == FieldKind::ListBase,
            "list base",
        )?;
        list.first
            .get()
            .write_ne_slice(&mut self.bytes[offset..offset + POINTER_SIZE]);
        list.last
            .get()
            .write_ne_slice(&mut self.bytes[offset + POINTER_SIZE..offset + 2 * POINTER_SIZE]);
        Ok(self)
    }
}

impl FieldAccess for StructValue<'_> {
    fn descriptor(&self) -> &StructDescriptor {
        self.descriptor
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
