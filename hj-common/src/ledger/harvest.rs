//! Harvest result store produced by the external website scraper
//!
//! CSV keyed by company id with an address and an optional confidence. Rows
//! below the configured confidence floor are dropped on load. When several
//! rows exist for one id, the highest-confidence valid address wins and ties
//! keep the earlier row.

use super::read_table;
use crate::address::{is_valid_address, HarvestLookup};
use crate::Result;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct HarvestStore {
    best: HashMap<u64, (String, f64)>,
}

impl HarvestStore {
    /// Load the store; a missing file yields an empty store
    pub fn load(path: &Path, min_confidence: f64) -> Result<Self> {
        let table = read_table(path)?;
        if table.is_empty() {
            tracing::info!(path = %path.display(), "No harvested addresses available");
        }
        let mut store = Self::default();
        for row in table.rows() {
            let Some(id) = row
                .non_empty(&["company_id", "id"])
                .and_then(|v| v.parse::<u64>().ok())
            else {
                continue;
            };
            let Some(email) = row.non_empty(&["email", "harvested_email", "address"]) else {
                continue;
            };
            let confidence = row
                .non_empty(&["confidence", "score"])
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);
            store.offer(id, email, confidence, min_confidence);
        }
        Ok(store)
    }

    fn offer(&mut self, id: u64, email: &str, confidence: f64, min_confidence: f64) {
        if confidence < min_confidence || !is_valid_address(email) {
            return;
        }
        match self.best.get(&id) {
            Some((_, existing)) if *existing >= confidence => {}
            _ => {
                self.best.insert(id, (email.to_string(), confidence));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}

impl HarvestLookup for HarvestStore {
    fn harvested_address(&self, company_id: u64) -> Option<&str> {
        self.best.get(&company_id).map(|(email, _)| email.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_threshold_and_best_pick() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvest.csv");
        std::fs::write(
            &path,
            "company_id,email,confidence\n\
             1,weak@one.example,0.3\n\
             2,first@two.example,0.6\n\
             2,better@two.example,0.9\n\
             2,tie@two.example,0.9\n\
             3,logo@2x.png,1.0\n\
             4,plain@four.example,\n",
        )
        .unwrap();

        let store = HarvestStore::load(&path, 0.5).unwrap();
        assert_eq!(store.harvested_address(1), None);
        assert_eq!(store.harvested_address(2), Some("better@two.example"));
        assert_eq!(store.harvested_address(3), None);
        assert_eq!(store.harvested_address(4), Some("plain@four.example"));

        let lenient = HarvestStore::load(&path, 0.3).unwrap();
        assert_eq!(lenient.harvested_address(1), Some("weak@one.example"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = HarvestStore::load(&dir.path().join("none.csv"), 0.5).unwrap();
        assert!(store.is_empty());
    }
}
