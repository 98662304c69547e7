//! Per-repository tags that are never purged, loaded from a JSON file:
//! `{"team/app": ["stable", "1.0.0"], "nginx": ["latest"]}`.

use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepList {
    tags: HashMap<String, Vec<String>>,
}

impl KeepList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and parse the file; any failure aborts the purge run
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&data).map_err(|e| {
            RegistryError::Config(format!("Cannot parse {}: {}", path.display(), e))
        })
    }

    /// Non-string entries and non-array values are ignored
    pub fn parse(data: &str) -> Result<Self> {
        let value: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
        let tags = value
            .into_iter()
            .map(|(repository, tags)| {
                let tags = tags
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                (repository, tags)
            })
            .collect();
        Ok(Self { tags })
    }

    pub fn contains(&self, repository: &str, tag: &str) -> bool {
        self.tags
            .get(repository)
            .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }

    pub fn tags_for(&self, repository: &str) -> &[String] {
        self.tags.get(repository).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn repositories(&self) -> usize {
        self.tags.len()
    }
}
