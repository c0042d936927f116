use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Visitor and click tallies, the product's oldest feature: a total visit
/// count, a unique-visitor count backed by hashed visitor identities, and
/// a per-feature click counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub total_visits: u64,
    #[serde(default)]
    pub unique_visitors: u64,
    #[serde(default)]
    pub visitor_hashes: Vec<String>,
    #[serde(default)]
    pub feature_clicks: BTreeMap<String, u64>,
}

/// `counters.json`, read-modify-written per request. Visitor identities are
/// stored only as truncated SHA-256 digests.
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Counters {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn record_visit(&self, visitor: &str) -> anyhow::Result<Counters> {
        let mut counters = self.load();
        counters.total_visits += 1;
        let digest = visitor_hash(visitor);
        if !counters.visitor_hashes.contains(&digest) {
            counters.visitor_hashes.push(digest);
            counters.unique_visitors += 1;
        }
        self.write(&counters)?;
        Ok(counters)
    }

    pub fn record_click(&self, feature: &str) -> anyhow::Result<u64> {
        let mut counters = self.load();
        let count = counters.feature_clicks.entry(feature.to_string()).or_insert(0);
        *count += 1;
        let updated = *count;
        self.write(&counters)?;
        Ok(updated)
    }

    fn write(&self, counters: &Counters) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(counters)?)?;
        Ok(())
    }
}

fn visitor_hash(visitor: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(visitor.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_visits_count_once_as_unique() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CounterStore::new(temp.path().join("counters.json"));

        store.record_visit("alex")?;
        store.record_visit("alex")?;
        let counters = store.record_visit("sam")?;

        assert_eq!(counters.total_visits, 3);
        assert_eq!(counters.unique_visitors, 2);
        Ok(())
    }

    #[test]
    fn clicks_tally_per_feature() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CounterStore::new(temp.path().join("counters.json"));

        assert_eq!(store.record_click("guess")?, 1);
        assert_eq!(store.record_click("guess")?, 2);
        assert_eq!(store.record_click("interpret")?, 1);

        let counters = store.load();
        assert_eq!(counters.feature_clicks["guess"], 2);
        assert_eq!(counters.feature_clicks["interpret"], 1);
        Ok(())
    }

    #[test]
    fn raw_visitor_identity_never_persisted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("counters.json");
        let store = CounterStore::new(&path);
        store.record_visit("alex@example.com")?;

        let raw = std::fs::read_to_string(&path)?;
        assert!(!raw.contains("alex@example.com"));
        Ok(())
    }
}
