//! CLI command implementations.

pub mod catalog;
pub mod inspect;
pub mod load;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use relink_core::TypeCatalog;

/// Read and build the catalog definition at `path`.
pub fn load_catalog(path: &Path) -> Result<TypeCatalog> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    TypeCatalog::from_json(&json).with_context(|| format!("parsing catalog {}", path.display()))
}
