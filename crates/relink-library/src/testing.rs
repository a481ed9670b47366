//! Documents shared by the unit tests of this crate.
//!
//! "scene" owns OBCube and OBLamp. OBCube's data is MECube and its one
//! modifier targets MAStone, both linked from "lib"; its parent is OBLamp.
//! "alpha" and "beta" each own one object whose data is the other's object.
//! "shelf" owns GRShelf, whose pointer array of entries names both scene
//! objects.

use std::collections::HashMap;
use std::sync::Arc;

use relink_core::{
    Address, DocumentId, Endian, ListBase, PointerTarget, Primitive, StructDefinition, StructValue,
    TypeCatalog, TypeCatalogBuilder,
};
use relink_file::{DataReader, Document, LoadedDocument, WriteOptions, Writer};

use crate::loader::{DocumentLoader, MemoryLoader};

const CUBE_AT: Address = Address::new(0x1000);
const LAMP_AT: Address = Address::new(0x2000);
const MESH_AT: Address = Address::new(0x3000);
const STONE_AT: Address = Address::new(0x4000);
const MODIFIER_AT: Address = Address::new(0x5000);
const VERTS_AT: Address = Address::new(0x6000);
const SHELF_AT: Address = Address::new(0x7000);
const ENTRIES_AT: Address = Address::new(0x7100);
const ENTRY_AT: [Address; 2] = [Address::new(0x7200), Address::new(0x7300)];

pub fn catalog() -> TypeCatalog {
    TypeCatalogBuilder::new()
        .define(StructDefinition::new("EntityHeader").chars("name", 32))
        .define(
            StructDefinition::new("Object")
                .inline("id", "EntityHeader")
                .array("loc", Primitive::F32, 3)
                .entity_pointer("data")
                .entity_pointer("parent")
                .list_base("modifiers"),
        )
        .define(
            StructDefinition::new("Modifier")
                .pointer("next", PointerTarget::Struct)
                .pointer("prev", PointerTarget::Struct)
                .chars("name", 16)
                .primitive("kind", Primitive::I32)
                .entity_pointer("target"),
        )
        .define(
            StructDefinition::new("Mesh")
                .inline("id", "EntityHeader")
                .primitive("totvert", Primitive::I32)
                .pointer("verts", PointerTarget::Array(Primitive::F32)),
        )
        .define(
            StructDefinition::new("Material")
                .inline("id", "EntityHeader")
                .primitive("roughness", Primitive::F32),
        )
        .define(
            StructDefinition::new("Collection")
                .inline("id", "EntityHeader")
                .pointer("entries", PointerTarget::PointerArray),
        )
        .define(StructDefinition::new("CollectionEntry").entity_pointer("object"))
        .build()
        .expect("fixture catalog")
}

pub struct Fixture {
    pub catalog: Arc<TypeCatalog>,
    /// Holds "scene", "lib", "alpha" and "beta".
    pub memory: Arc<MemoryLoader>,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Fixture {
            catalog: Arc::new(catalog()),
            memory: Arc::new(MemoryLoader::new()),
        };
        fixture.memory.insert("scene", fixture.scene_bytes());
        fixture.memory.insert("lib", fixture.library_bytes());
        fixture
            .memory
            .insert("alpha", fixture.object_bytes("alpha", "OBAlpha", "OBBeta", "beta"));
        fixture
            .memory
            .insert("beta", fixture.object_bytes("beta", "OBBeta", "OBAlpha", "alpha"));
        fixture
    }

    pub fn loader(&self) -> Arc<dyn DocumentLoader> {
        Arc::clone(&self.memory) as Arc<dyn DocumentLoader>
    }

    fn object(&self, name: &str, data: Address, parent: Address) -> StructValue<'_> {
        let desc = self.catalog.descriptor_by_name("Object").expect("Object");
        let mut object = StructValue::new(desc);
        object
            .set_str("id.name", name)
            .and_then(|o| o.set_array("loc", &[1.0f32, 2.0, 3.0]))
            .and_then(|o| o.set_pointer("data", data))
            .and_then(|o| o.set_pointer("parent", parent))
            .expect("object fields");
        object
    }

    pub fn scene_bytes(&self) -> Vec<u8> {
        let catalog = self.catalog.as_ref();
        let mut writer = Writer::to_vec(catalog, WriteOptions::new("scene")).expect("writer");
        let object = writer.struct_id("Object").expect("Object");
        let modifier = writer.struct_id("Modifier").expect("Modifier");

        let mut cube = self.object("OBCube", MESH_AT, LAMP_AT);
        cube.set_list_base("modifiers", ListBase::new(MODIFIER_AT, MODIFIER_AT))
            .expect("modifiers");
        writer
            .write_entity(object, CUBE_AT, "OBCube", &cube.into_bytes())
            .expect("cube");

        let mut bevel = StructValue::new(catalog.descriptor_by_name("Modifier").expect("Modifier"));
        bevel
            .set_str("name", "Bevel")
            .and_then(|m| m.set("kind", 1i32))
            .and_then(|m| m.set_pointer("target", STONE_AT))
            .expect("modifier fields");
        let memory = HashMap::from([(MODIFIER_AT, bevel.into_bytes())]);
        writer
            .write_struct_list(modifier, ListBase::new(MODIFIER_AT, MODIFIER_AT), &memory)
            .expect("modifiers");

        let lamp = self.object("OBLamp", Address::NULL, Address::NULL);
        writer
            .write_entity(object, LAMP_AT, "OBLamp", &lamp.into_bytes())
            .expect("lamp");

        let lib = DocumentId::new("lib");
        let mesh = writer.struct_id("Mesh").expect("Mesh");
        let material = writer.struct_id("Material").expect("Material");
        writer
            .write_linked_entity(mesh, MESH_AT, "MECube", &lib)
            .expect("mesh link");
        writer
            .write_linked_entity(material, STONE_AT, "MAStone", &lib)
            .expect("material link");
        writer.finish().expect("finish")
    }

    pub fn library_bytes(&self) -> Vec<u8> {
        self.library(true)
    }

    /// "lib" with MAStone only.
    pub fn library_without_mesh_bytes(&self) -> Vec<u8> {
        self.library(false)
    }

    fn library(&self, with_mesh: bool) -> Vec<u8> {
        let catalog = self.catalog.as_ref();
        let mut writer = Writer::to_vec(catalog, WriteOptions::new("lib")).expect("writer");

        if with_mesh {
            let id = writer.struct_id("Mesh").expect("Mesh");
            let mut mesh = StructValue::new(catalog.descriptor_by_name("Mesh").expect("Mesh"));
            mesh.set_str("id.name", "MECube")
                .and_then(|m| m.set("totvert", 2i32))
                .and_then(|m| m.set_pointer("verts", VERTS_AT))
                .expect("mesh fields");
            writer
                .write_entity(id, MESH_AT, "MECube", &mesh.into_bytes())
                .expect("mesh");
            writer
                .write_f32_array(VERTS_AT, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
                .expect("verts");
        }

        let id = writer.struct_id("Material").expect("Material");
        let mut stone = StructValue::new(catalog.descriptor_by_name("Material").expect("Material"));
        stone
            .set_str("id.name", "MAStone")
            .and_then(|m| m.set("roughness", 0.5f32))
            .expect("material fields");
        writer
            .write_entity(id, STONE_AT, "MAStone", &stone.into_bytes())
            .expect("material");
        writer.finish().expect("finish")
    }

    /// A document owning `name`, whose data is `target` linked from `library`.
    pub fn object_bytes(
        &self,
        document: &str,
        name: &str,
        target: &str,
        library: &str,
    ) -> Vec<u8> {
        let catalog = self.catalog.as_ref();
        let mut writer = Writer::to_vec(catalog, WriteOptions::new(document)).expect("writer");
        let object = writer.struct_id("Object").expect("Object");
        let value = self.object(name, LAMP_AT, Address::NULL);
        writer
            .write_entity(object, CUBE_AT, name, &value.into_bytes())
            .expect("object");
        writer
            .write_linked_entity(object, LAMP_AT, target, &DocumentId::new(library))
            .expect("link");
        writer.finish().expect("finish")
    }
}

impl Fixture {
    /// "shelf", written in `endian`.
    pub fn collection_bytes(&self, endian: Endian) -> Vec<u8> {
        let catalog = self.catalog.as_ref();
        let options = WriteOptions::new("shelf").endian(endian);
        let mut writer = Writer::to_vec(catalog, options).expect("writer");
        let collection = writer.struct_id("Collection").expect("Collection");
        let entry = writer.struct_id("CollectionEntry").expect("CollectionEntry");
        let object = writer.struct_id("Object").expect("Object");

        let desc = catalog.descriptor_by_name("Collection").expect("Collection");
        let mut shelf = StructValue::new(desc);
        shelf
            .set_str("id.name", "GRShelf")
            .and_then(|c| c.set_pointer("entries", ENTRIES_AT))
            .expect("collection fields");
        writer
            .write_entity(collection, SHELF_AT, "GRShelf", &shelf.into_bytes())
            .expect("collection");
        writer
            .write_pointer_array(ENTRIES_AT, &ENTRY_AT)
            .expect("entries");

        let desc = catalog
            .descriptor_by_name("CollectionEntry")
            .expect("CollectionEntry");
        for (at, target) in ENTRY_AT.iter().zip([CUBE_AT, LAMP_AT]) {
            let mut value = StructValue::new(desc);
            value.set_pointer("object", target).expect("entry object");
            writer
                .write_struct(entry, *at, &value.into_bytes())
                .expect("entry");
        }

        let scene = DocumentId::new("scene");
        writer
            .write_linked_entity(object, CUBE_AT, "OBCube", &scene)
            .expect("cube link");
        writer
            .write_linked_entity(object, LAMP_AT, "OBLamp", &scene)
            .expect("lamp link");
        writer.finish().expect("finish")
    }
}

/// Decode and relink every entity of `bytes`, without publishing.
pub fn read_document(fixture: &Fixture, bytes: &[u8]) -> LoadedDocument {
    let document = Document::from_bytes(bytes).expect("decode");
    let mut reader = DataReader::new(&fixture.catalog, document).expect("reader");
    for entity in reader.entities().to_vec() {
        reader.relink(entity).expect("relink");
    }
    reader.finish()
}
