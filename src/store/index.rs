//! The JSON index file: one array of memories, newest first.

use super::fsutil::write_atomic;
use crate::error::Result;
use crate::models::Memory;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Handle to the on-disk index
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the index. A missing file is an empty index.
    pub async fn load(&self) -> Result<Vec<Memory>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No index at {:?}, starting empty", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let memories: Vec<Memory> = serde_json::from_slice(&bytes)?;
        Ok(dedupe_ids(memories))
    }

    /// Write the whole index atomically
    pub async fn save(&self, memories: &[Memory]) -> io::Result<()> {
        let bytes = encode(memories)?;
        write_atomic(&self.path, &bytes).await?;
        debug!("Saved {} memories to {:?}", memories.len(), self.path);
        Ok(())
    }

    /// Move an unreadable index aside so the next save does not overwrite it.
    /// Earlier quarantined copies are kept: `.corrupt`, then `.corrupt.1`, ...
    pub async fn quarantine(&self) -> io::Result<PathBuf> {
        let mut base = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        base.push(".corrupt");

        let mut aside = self.path.with_file_name(&base);
        let mut counter = 0u32;
        while fs::try_exists(&aside).await? {
            counter += 1;
            let mut name = base.clone();
            name.push(format!(".{}", counter));
            aside = self.path.with_file_name(name);
        }

        fs::rename(&self.path, &aside).await?;
        Ok(aside)
    }
}

/// Pretty JSON with keys sorted at every level
pub fn encode(memories: &[Memory]) -> io::Result<Vec<u8>> {
    let value = serde_json::to_value(memories).map_err(io::Error::other)?;
    serde_json::to_vec_pretty(&sort_keys(value)).map_err(io::Error::other)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn dedupe_ids(memories: Vec<Memory>) -> Vec<Memory> {
    let mut seen = HashSet::new();
    let before = memories.len();
    let kept: Vec<Memory> = memories
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    if kept.len() != before {
        warn!(
            "Index contained {} duplicate memory ids; keeping the newest entries",
            before - kept.len()
        );
    }
    kept
}
