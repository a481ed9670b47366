//! `relink.toml` session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use relink_core::{DocumentId, Endian, EntityKey};
use relink_file::WriteOptions;

use crate::error::ConfigError;
use crate::expander::DEFAULT_MAX_DOCUMENTS;

/// The top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub write: WriteConfig,
}

/// `[load]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Follow references into other documents.
    #[serde(default = "default_expand")]
    pub expand: bool,
    /// Root entities to load; every entity of the root document when absent.
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    /// Entities left out of the session, as `name` (in the root document)
    /// or `name@document`.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

fn default_expand() -> bool {
    true
}

fn default_max_documents() -> usize {
    DEFAULT_MAX_DOCUMENTS
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            expand: default_expand(),
            entities: None,
            exclude: Vec::new(),
            max_documents: default_max_documents(),
        }
    }
}

impl LoadConfig {
    /// Registry keys of the excluded entities, bare names taken from `root`.
    pub fn excluded_keys(&self, root: &DocumentId) -> Vec<EntityKey> {
        self.exclude
            .iter()
            .map(|entry| match entry.rsplit_once('@') {
                Some((name, document)) => EntityKey::new(name, document),
                None => EntityKey::new(entry.as_str(), root.clone()),
            })
            .collect()
    }
}

/// `[write]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Host order when absent.
    #[serde(default)]
    pub endian: Option<Endian>,
    #[serde(default)]
    pub undo: bool,
}

impl SessionConfig {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.load.max_documents == 0 {
            return Err(ConfigError::Invalid {
                detail: "load.max_documents must be at least 1".into(),
            });
        }
        if let Some(bad) = self
            .load
            .exclude
            .iter()
            .find(|e| e.is_empty() || e.starts_with('@') || e.ends_with('@'))
        {
            return Err(ConfigError::Invalid {
                detail: format!("malformed exclude entry '{bad}'"),
            });
        }
        Ok(())
    }

    /// Writer options for saving `document` under this configuration.
    pub fn write_options(&self, document: impl Into<DocumentId>) -> WriteOptions {
        let options = WriteOptions::new(document).undo(self.write.undo);
        match self.write.endian {
            Some(endian) => options.endian(endian),
            None => options,
        }
    }
}
