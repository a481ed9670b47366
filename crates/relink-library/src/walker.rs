//! Discovery of the entities an entity references.
//!
//! An [`IdWalker`] reports the registry keys of every entity reachable from
//! one entity block without crossing into another entity. The expander asks
//! the walker registered for the entity's struct type, falling back to the
//! catalog-driven [`CatalogWalker`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relink_core::{
    Address, BlockHandle, EntityKey, FieldKind, PointerTarget, StructId, TypeCatalog,
};
use relink_file::{LoadedDocument, ReadError};

/// Capability implemented per entity struct type.
pub trait IdWalker: Send + Sync {
    fn references(
        &self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
        entity: BlockHandle,
    ) -> Result<Vec<EntityKey>, ReadError>;
}

/// Follows every entity pointer of the entity and of the data it owns.
///
/// Data pointers, lists and pointer arrays are followed; pointers to other
/// entity blocks are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogWalker;

impl IdWalker for CatalogWalker {
    fn references(
        &self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
        entity: BlockHandle,
    ) -> Result<Vec<EntityKey>, ReadError> {
        let mut found = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![entity];

        while let Some(handle) = stack.pop() {
            if !visited.insert(handle) {
                continue;
            }
            let block = document.block(handle)?;
            let Some(id) = block.struct_id() else { continue };
            if block.is_placeholder() || (handle != entity && block.entity().is_some()) {
                continue;
            }
            let desc = catalog.descriptor(id)?;
            for element in 0..block.count() {
                let base = element * desc.size;
                for field in &desc.fields {
                    for i in 0..field.count {
                        let offset = base + field.element_offset(i);
                        let token = block.token_at(offset).unwrap_or(Address::NULL);
                        if token.is_null() {
                            continue;
                        }
                        match field.kind {
                            FieldKind::EntityPointer => {
                                if let Some(key) = document.entity_target(token) {
                                    if seen_keys.insert(key.clone()) {
                                        found.push(key);
                                    }
                                }
                            }
                            FieldKind::Pointer(PointerTarget::Struct) => {
                                stack.extend(document.resolve(token));
                            }
                            FieldKind::Pointer(PointerTarget::PointerArray) => {
                                if let Some(array) = document.resolve(token) {
                                    for element in document.pointer_array(array)? {
                                        stack.extend(document.resolve(element));
                                    }
                                }
                            }
                            FieldKind::ListBase => {
                                stack.extend(document.resolve(token));
                                let last = block.token_at(offset + relink_core::POINTER_SIZE);
                                stack.extend(last.and_then(|t| document.resolve(t)));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(found)
    }
}

/// Reports only the named entity-pointer fields of the entity block itself.
#[derive(Debug, Clone)]
pub struct FieldWalker {
    fields: Vec<String>,
}

impl FieldWalker {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl IdWalker for FieldWalker {
    fn references(
        &self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
        entity: BlockHandle,
    ) -> Result<Vec<EntityKey>, ReadError> {
        let view = document.view(catalog, entity)?;
        let mut found = Vec::new();
        for name in &self.fields {
            let token = relink_core::FieldAccess::pointer(&view, name)?;
            if let Some(key) = document.entity_target(token) {
                if !found.contains(&key) {
                    found.push(key);
                }
            }
        }
        Ok(found)
    }
}

/// Walkers by struct name, with a fallback.
#[derive(Clone)]
pub struct WalkerSet {
    fallback: Arc<dyn IdWalker>,
    by_struct: HashMap<String, Arc<dyn IdWalker>>,
}

impl Default for WalkerSet {
    fn default() -> Self {
        Self {
            fallback: Arc::new(CatalogWalker),
            by_struct: HashMap::new(),
        }
    }
}

impl WalkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, strukt: impl Into<String>, walker: impl IdWalker + 'static) -> Self {
        self.by_struct.insert(strukt.into(), Arc::new(walker));
        self
    }

    pub fn fallback(mut self, walker: impl IdWalker + 'static) -> Self {
        self.fallback = Arc::new(walker);
        self
    }

    pub fn walker_for(&self, catalog: &TypeCatalog, id: StructId) -> &dyn IdWalker {
        catalog
            .descriptor(id)
            .ok()
            .and_then(|desc| self.by_struct.get(&desc.name))
            .map_or(self.fallback.as_ref(), |w| w.as_ref())
    }

    /// References of `entity`, using the walker for its struct type.
    pub fn references(
        &self,
        document: &LoadedDocument,
        catalog: &TypeCatalog,
        entity: BlockHandle,
    ) -> Result<Vec<EntityKey>, ReadError> {
        let block = document.block(entity)?;
        let id = block
            .struct_id()
            .ok_or(ReadError::NotAStruct { block: entity })?;
        self.walker_for(catalog, id).references(document, catalog, entity)
    }
}

impl std::fmt::Debug for WalkerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_struct.keys().collect();
        names.sort();
        f.debug_struct("WalkerSet").field("by_struct", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{read_document, Fixture};
    use relink_core::Endian;
    use relink_file::{DataReader, Document};

    #[test]
    fn catalog_walker_follows_owned_data() {
        let fixture = Fixture::new();
        let doc = read_document(&fixture, &fixture.scene_bytes());
        let cube = doc.entity("OBCube").unwrap();

        let mut refs = CatalogWalker.references(&doc, &fixture.catalog, cube).unwrap();
        refs.sort();
        assert_eq!(
            refs,
            vec![
                EntityKey::new("MAStone", "lib"),
                EntityKey::new("MECube", "lib"),
                EntityKey::new("OBLamp", "scene"),
            ]
        );

        let lamp = doc.entity("OBLamp").unwrap();
        assert!(CatalogWalker
            .references(&doc, &fixture.catalog, lamp)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn catalog_walker_reads_unsettled_pointer_arrays() {
        let fixture = Fixture::new();
        for endian in [Endian::host(), Endian::host().opposite()] {
            let bytes = fixture.collection_bytes(endian);
            let document = Document::from_bytes(&bytes).unwrap();
            let doc = DataReader::new(&fixture.catalog, document).unwrap().finish();
            let shelf = doc.entity("GRShelf").unwrap();

            let mut refs = CatalogWalker.references(&doc, &fixture.catalog, shelf).unwrap();
            refs.sort();
            assert_eq!(
                refs,
                vec![
                    EntityKey::new("OBCube", "scene"),
                    EntityKey::new("OBLamp", "scene"),
                ],
                "{endian:?}"
            );
        }
    }

    #[test]
    fn field_walker_reports_named_fields_only() {
        let fixture = Fixture::new();
        let doc = read_document(&fixture, &fixture.scene_bytes());
        let cube = doc.entity("OBCube").unwrap();

        let walker = FieldWalker::new(["data"]);
        assert_eq!(
            walker.references(&doc, &fixture.catalog, cube).unwrap(),
            vec![EntityKey::new("MECube", "lib")]
        );
    }

    #[test]
    fn walker_set_picks_by_struct() {
        let fixture = Fixture::new();
        let doc = read_document(&fixture, &fixture.scene_bytes());
        let cube = doc.entity("OBCube").unwrap();

        let set = WalkerSet::new().register("Object", FieldWalker::new(["parent"]));
        assert_eq!(
            set.references(&doc, &fixture.catalog, cube).unwrap(),
            vec![EntityKey::new("OBLamp", "scene")]
        );
        assert_eq!(
            WalkerSet::new()
                .references(&doc, &fixture.catalog, cube)
                .unwrap()
                .len(),
            3
        );
    }
}
