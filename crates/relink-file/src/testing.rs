//! Fixtures shared by the unit tests of this crate.

use std::collections::HashMap;

use relink_core::{
    Address, DocumentId, Endian, ListBase, PointerTarget, Primitive, StructDefinition,
    StructValue, TypeCatalog, TypeCatalogBuilder,
};

use crate::writer::{WriteOptions, Writer};

pub const VERTS: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.5, -2.0, 0.25], [3.0, 1e-3, -7.5]];
pub const NODE_VALUES: [i32; 5] = [10, 20, 30, 40, 50];

pub fn catalog() -> TypeCatalog {
    TypeCatalogBuilder::new()
        .define(
            StructDefinition::new("EntityHeader")
                .chars("name", 32)
                .primitive("flag", Primitive::I16),
        )
        .define(
            StructDefinition::new("Node")
                .pointer("next", PointerTarget::Struct)
                .pointer("prev", PointerTarget::Struct)
                .primitive("value", Primitive::I32)
                .primitive("weight", Primitive::F64),
        )
        .define(
            StructDefinition::new("Material")
                .inline("id", "EntityHeader")
                .primitive("roughness", Primitive::F32),
        )
        .define(
            StructDefinition::new("Mesh")
                .inline("id", "EntityHeader")
                .primitive("totvert", Primitive::I32)
                .pointer("verts", PointerTarget::Array(Primitive::F32))
                .pointer("indices", PointerTarget::Array(Primitive::I32))
                .pointer("layers", PointerTarget::PointerArray)
                .pointer("label", PointerTarget::Raw)
                .list_base("nodes")
                .entity_pointer("material"),
        )
        .build()
        .expect("fixture catalog")
}

pub fn node_value(
    catalog: &TypeCatalog,
    value: i32,
    weight: f64,
    next: Address,
) -> StructValue<'_> {
    let desc = catalog.descriptor_by_name("Node").expect("Node");
    let mut node = StructValue::new(desc);
    node.set("value", value)
        .and_then(|n| n.set("weight", weight))
        .and_then(|n| n.set_pointer("next", next))
        .expect("node fields");
    node
}

pub fn mesh_value<'c>(
    catalog: &'c TypeCatalog,
    name: &str,
    verts: Address,
    material: Address,
) -> StructValue<'c> {
    let desc = catalog.descriptor_by_name("Mesh").expect("Mesh");
    let mut mesh = StructValue::new(desc);
    mesh.set_str("id.name", name)
        .and_then(|m| m.set_pointer("verts", verts))
        .and_then(|m| m.set_pointer("material", material))
        .expect("mesh fields");
    mesh
}

/// One mesh entity with typed arrays, a pointer array, a string, a
/// five-node list and a material linked from document "materials".
pub fn write_scene(catalog: &TypeCatalog, endian: Endian) -> Vec<u8> {
    let mesh_at = Address::new(0x7f00_0000);
    let verts_at = Address::new(0x7f00_0100);
    let indices_at = Address::new(0x7f00_0200);
    let layers_at = Address::new(0x7f00_0300);
    let label_at = Address::new(0x7f00_0400);
    let material_at = Address::new(0x7f00_0500);
    let layer_at = [Address::new(0x7f00_0600), Address::new(0x7f00_0700)];
    let node_at: Vec<Address> = (0..NODE_VALUES.len())
        .map(|i| Address::new(0x7f10_0000 + 0x100 * i as u64))
        .collect();

    let mut memory = HashMap::new();
    for (i, value) in NODE_VALUES.iter().enumerate() {
        let next = node_at.get(i + 1).copied().unwrap_or(Address::NULL);
        let prev = i.checked_sub(1).map_or(Address::NULL, |p| node_at[p]);
        let mut node = node_value(catalog, *value, *value as f64 * 0.5, next);
        node.set_pointer("prev", prev).expect("prev");
        memory.insert(node_at[i], node.into_bytes());
    }

    let mut mesh = mesh_value(catalog, "MECube", verts_at, material_at);
    mesh.set("totvert", VERTS.len() as i32)
        .and_then(|m| m.set_pointer("indices", indices_at))
        .and_then(|m| m.set_pointer("layers", layers_at))
        .and_then(|m| m.set_pointer("label", label_at))
        .and_then(|m| {
            m.set_list_base(
                "nodes",
                ListBase::new(node_at[0], node_at[NODE_VALUES.len() - 1]),
            )
        })
        .expect("mesh fields");

    let options = WriteOptions::new("scene").endian(endian);
    let mut writer = Writer::to_vec(catalog, options).expect("writer");
    let mesh_id = writer.struct_id("Mesh").expect("Mesh");
    let node_id = writer.struct_id("Node").expect("Node");
    let material_id = writer.struct_id("Material").expect("Material");

    writer
        .write_entity(mesh_id, mesh_at, "MECube", &mesh.into_bytes())
        .expect("mesh");
    writer.write_f32x3_array(verts_at, &VERTS).expect("verts");
    writer.write_i32_array(indices_at, &[0, 1, 2]).expect("indices");
    writer.write_pointer_array(layers_at, &layer_at).expect("layers");
    for (i, at) in layer_at.iter().enumerate() {
        let layer = node_value(catalog, 100 + i as i32, 0.0, Address::NULL);
        writer.write_struct(node_id, *at, &layer.into_bytes()).expect("layer");
    }
    writer.write_string(label_at, "cube").expect("label");
    writer
        .write_struct_list(node_id, ListBase::new(node_at[0], node_at[4]), &memory)
        .expect("nodes");
    writer
        .write_linked_entity(material_id, material_at, "MAStone", &DocumentId::new("materials"))
        .expect("material");
    writer.finish().expect("finish")
}
