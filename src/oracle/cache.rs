use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::ComparisonResult;
use crate::util::write_json_pretty;

/// Comparison results keyed by content hash, persisted as one JSON object.
/// The whole file is rewritten after every insert.
#[derive(Debug)]
pub struct ResponseCache {
    path: PathBuf,
    entries: BTreeMap<String, ComparisonResult>,
}

impl ResponseCache {
    /// Loads `path` if it exists. An unreadable or malformed file starts an
    /// empty cache; malformed entries are dropped individually.
    pub fn open(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(raw) => parse_entries(path, &raw),
            Err(_) => BTreeMap::new(),
        };

        debug!(
            path = %path.display(),
            entries = entries.len(),
            "opened comparison cache"
        );

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&ComparisonResult> {
        self.entries.get(key)
    }

    /// Stores `result` and persists the cache. A failed write is logged and
    /// the in-memory entry is kept.
    pub fn insert(&mut self, key: String, result: ComparisonResult) {
        self.entries.insert(key, result);
        if let Err(error) = self.save() {
            warn!(
                path = %self.path.display(),
                error = %error,
                "failed to persist comparison cache"
            );
        }
    }

    fn save(&self) -> Result<()> {
        // Round-trip through `Value` so every object is written with sorted keys.
        let value = serde_json::to_value(&self.entries)
            .context("failed to serialize comparison cache")?;
        write_json_pretty(&self.path, &value)
    }
}

fn parse_entries(path: &Path, raw: &str) -> BTreeMap<String, ComparisonResult> {
    let parsed = match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(
                path = %path.display(),
                error = %error,
                "ignoring unreadable comparison cache"
            );
            return BTreeMap::new();
        }
    };

    parsed
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_value::<ComparisonResult>(value)
                .ok()
                .map(|result| (key, result))
        })
        .collect()
}
