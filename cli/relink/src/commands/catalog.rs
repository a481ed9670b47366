//! `relink catalog`: build a catalog definition and print the resolved layout.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use relink_core::{hash_hex, StructDescriptor, TypeCatalog};

#[derive(Serialize)]
struct CatalogSummary<'a> {
    fingerprint: String,
    structs: Vec<&'a StructDescriptor>,
}

pub fn run(path: &Path, json: bool) -> Result<()> {
    let catalog = super::load_catalog(path)?;

    if json {
        let summary = CatalogSummary {
            fingerprint: hash_hex(catalog.fingerprint()),
            structs: catalog.iter().collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print!("{}", render(&catalog));
    Ok(())
}

pub fn render(catalog: &TypeCatalog) -> String {
    let mut out = format!(
        "fingerprint: {}\nstructs:     {}\n",
        hash_hex(catalog.fingerprint()),
        catalog.len()
    );
    for desc in catalog.iter() {
        out.push_str(&format!("\n{} (id {}, {} bytes)\n", desc.name, desc.id.0, desc.size));
        for field in &desc.fields {
            let count = if field.count > 1 {
                format!("[{}]", field.count)
            } else {
                String::new()
            };
            out.push_str(&format!(
                "  {:>5}  {}{}: {}\n",
                field.offset,
                field.name,
                count,
                field.kind.describe()
            ));
        }
    }
    out
}
