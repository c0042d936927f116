use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Reply cache for one-shot completion features, keyed by a stable hash of
/// `{feature, model, inputs}`. A repeated identical request re-renders the
/// stored reply without a second model call or insight charge.
#[derive(Debug, Clone)]
pub struct CompletionCache {
    path: PathBuf,
}

impl CompletionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let payload = read_json_object(&self.path)?;
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set(&self, key: &str, reply: &str) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path).unwrap_or_default();
        payload.insert(key.to_string(), Value::String(reply.to_string()));
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &self.path,
            serde_json::to_string_pretty(&Value::Object(payload))?,
        )?;
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let cache = CompletionCache::new(temp.path().join("cache.json"));

        assert!(cache.get("k1").is_none());
        cache.set("k1", "a reply")?;
        cache.set("k2", "another")?;
        assert_eq!(cache.get("k1").as_deref(), Some("a reply"));
        assert_eq!(cache.get("k2").as_deref(), Some("another"));
        Ok(())
    }

    #[test]
    fn corrupt_cache_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cache.json");
        std::fs::write(&path, "not json")?;
        let cache = CompletionCache::new(&path);
        assert!(cache.get("k1").is_none());
        cache.set("k1", "fresh")?;
        assert_eq!(cache.get("k1").as_deref(), Some("fresh"));
        Ok(())
    }
}
