//! `relink load`: run a load session over a directory of documents.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use relink_core::DocumentId;
use relink_library::{
    DirectoryLoader, IdentityRegistry, LoadReport, LoadSession, SessionConfig, SessionContext,
};

/// Config file picked up from the document directory.
pub const CONFIG_FILE: &str = "relink.toml";

pub fn run(
    document: &str,
    dir: &Path,
    catalog: &Path,
    config: Option<&Path>,
    json: bool,
) -> Result<()> {
    let report = load(document, dir, catalog, config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

pub fn load(
    document: &str,
    dir: &Path,
    catalog: &Path,
    config: Option<&Path>,
) -> Result<LoadReport> {
    let catalog = super::load_catalog(catalog)?;
    let config = match config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let default = dir.join(CONFIG_FILE);
            if default.is_file() {
                debug!(path = %default.display(), "using directory config");
                SessionConfig::from_file(&default)
                    .with_context(|| format!("reading {}", default.display()))?
            } else {
                SessionConfig::default()
            }
        }
    };

    debug!(
        root = document,
        dir = %dir.display(),
        expand = config.load.expand,
        max_documents = config.load.max_documents,
        "starting load session"
    );
    let context = SessionContext::new(
        Arc::new(catalog),
        Arc::new(IdentityRegistry::new()),
        Arc::new(DirectoryLoader::new(dir)),
    );
    LoadSession::new(&context, config.load)
        .load(&DocumentId::new(document))
        .with_context(|| format!("loading '{document}' from {}", dir.display()))
}

pub fn render(report: &LoadReport) -> String {
    let mut out = format!("root: {}\n", report.root);
    let loaded: Vec<String> = report.loaded.iter().map(ToString::to_string).collect();
    out.push_str(&format!("loaded documents: {}\n", loaded.join(", ")));

    let section = |out: &mut String, title: &str, keys: &[relink_core::EntityKey]| {
        if keys.is_empty() {
            return;
        }
        out.push_str(&format!("{title} ({}):\n", keys.len()));
        for key in keys {
            out.push_str(&format!("  {key}\n"));
        }
    };
    section(&mut out, "resolved", &report.resolved);
    section(&mut out, "missing", &report.missing);
    section(&mut out, "pending", &report.pending);

    if !report.failed.is_empty() {
        out.push_str(&format!("failed ({}):\n", report.failed.len()));
        for failed in &report.failed {
            out.push_str(&format!("  {}: {}\n", failed.key, failed.reason));
        }
    }
    if !report.issues.is_empty() {
        out.push_str(&format!("issues ({}):\n", report.issues.len()));
        for issue in &report.issues {
            out.push_str(&format!("  {}: {}\n", issue.document, issue.issue));
        }
    }
    out.push_str(if report.is_complete() {
        "complete\n"
    } else {
        "incomplete\n"
    });
    out
}
