//! Processed-UID tracking file for the bounce ingestor
//!
//! JSON `{last_updated, processed_message_ids[], total_processed}`, rewritten
//! atomically after each ingest pass.

use super::write_atomic;
use crate::time::{format_timestamp, now};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TrackingFile {
    #[serde(default)]
    last_updated: String,
    #[serde(default)]
    processed_message_ids: Vec<String>,
    #[serde(default)]
    total_processed: u64,
}

#[derive(Debug, Clone)]
pub struct ProcessedTracking {
    path: PathBuf,
    file: TrackingFile,
    index: HashSet<String>,
}

impl ProcessedTracking {
    /// Load tracking state; a missing file starts empty
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file: TrackingFile = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TrackingFile::default(),
            Err(e) => return Err(e.into()),
        };
        let index = file.processed_message_ids.iter().cloned().collect();
        Ok(Self { path, file, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.index.contains(uid)
    }

    /// Record a processed UID; returns `false` if it was already tracked
    pub fn insert(&mut self, uid: &str) -> bool {
        if !self.index.insert(uid.to_string()) {
            return false;
        }
        self.file.processed_message_ids.push(uid.to_string());
        self.file.total_processed += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_processed(&self) -> u64 {
        self.file.total_processed
    }

    /// Forget every processed UID
    pub fn reset(&mut self) {
        self.file = TrackingFile::default();
        self.index.clear();
    }

    pub fn save(&mut self) -> Result<()> {
        self.file.last_updated = format_timestamp(&now());
        let json = serde_json::to_vec_pretty(&self.file)?;
        write_atomic(&self.path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed.json");

        let mut tracking = ProcessedTracking::load(&path).unwrap();
        assert!(tracking.is_empty());
        assert!(tracking.insert("42"));
        assert!(!tracking.insert("42"));
        tracking.save().unwrap();

        let reloaded = ProcessedTracking::load(&path).unwrap();
        assert!(reloaded.contains("42"));
        assert_eq!(reloaded.total_processed(), 1);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["processed_message_ids"][0], "42");
        assert!(raw["last_updated"].as_str().unwrap().len() > 10);
    }

    #[test]
    fn test_reset() {
        let dir = TempDir::new().unwrap();
        let mut tracking = ProcessedTracking::load(dir.path().join("p.json")).unwrap();
        tracking.insert("1");
        tracking.reset();
        assert!(!tracking.contains("1"));
        assert_eq!(tracking.total_processed(), 0);
    }
}
