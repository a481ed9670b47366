//! `relink inspect`: document header and record listing.
//!
//! Works on the container alone, so no catalog is needed.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use relink_core::hash_hex;
use relink_file::{Document, DocumentFlags, Record};

#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub document: String,
    pub version: String,
    pub endian: String,
    pub undo: bool,
    pub compressed: bool,
    pub fingerprint: String,
    pub records: Vec<RecordSummary>,
}

#[derive(Debug, Serialize)]
pub struct RecordSummary {
    pub kind: &'static str,
    pub struct_id: Option<u16>,
    pub identity: String,
    pub count: u32,
    pub bytes: usize,
    pub entity: Option<String>,
    pub library: Option<String>,
}

impl RecordSummary {
    fn new(record: &Record) -> Self {
        Self {
            kind: record.kind.name(),
            struct_id: record.struct_id.map(|id| id.0),
            identity: record.identity.to_string(),
            count: record.count,
            bytes: record.payload.len(),
            entity: record.entity.as_ref().map(|meta| meta.name.clone()),
            library: record
                .entity
                .as_ref()
                .and_then(|meta| meta.library.as_ref())
                .map(|lib| lib.to_string()),
        }
    }
}

pub fn summarize(document: &Document) -> DocumentSummary {
    let header = &document.header;
    DocumentSummary {
        document: header.document.to_string(),
        version: header.version.to_string(),
        endian: format!("{:?}", header.endian).to_lowercase(),
        undo: header.is_undo(),
        compressed: header.flags.has(DocumentFlags::COMPRESSED),
        fingerprint: hash_hex(&header.fingerprint),
        records: document.records.iter().map(RecordSummary::new).collect(),
    }
}

pub fn run(file: &Path, json: bool) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let document =
        Document::from_bytes(&bytes).with_context(|| format!("parsing {}", file.display()))?;
    let summary = summarize(&document);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("document:    {}", summary.document);
    println!("version:     {}", summary.version);
    println!("endian:      {}", summary.endian);
    println!("undo:        {}", summary.undo);
    println!("fingerprint: {}", summary.fingerprint);
    println!("records:     {}", summary.records.len());
    for record in &summary.records {
        let ty = record
            .struct_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        print!(
            "  {:<6} {:>18} struct {:>5} x{:<4} {:>8} bytes",
            record.kind, record.identity, ty, record.count, record.bytes
        );
        match (&record.entity, &record.library) {
            (Some(name), Some(lib)) => println!("  {name} <- {lib}"),
            (Some(name), None) => println!("  {name}"),
            _ => println!(),
        }
    }
    Ok(())
}
