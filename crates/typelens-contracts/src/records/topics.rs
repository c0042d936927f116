use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Topic covered during one interview session, appended when the session
/// completes. The per-user history biases future sessions away from
/// repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub user: String,
    pub session_id: String,
    pub topic: String,
    pub ts: String,
}

/// Append-only `topics.jsonl`.
#[derive(Debug, Clone)]
pub struct TopicStore {
    path: PathBuf,
}

impl TopicStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, user: &str, session_id: &str, topic: &str) -> anyhow::Result<()> {
        let record = TopicRecord {
            user: user.to_string(),
            session_id: session_id.to_string(),
            topic: topic.to_string(),
            ts: now_utc_iso(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        use std::io::Write;
        file.write_all(serde_json::to_string(&record)?.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Distinct topics for one user, oldest first.
    pub fn topics_for_user(&self, user: &str) -> Vec<String> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let mut topics: Vec<String> = Vec::new();
        for line in raw.lines() {
            let Ok(record) = serde_json::from_str::<TopicRecord>(line) else {
                continue;
            };
            if record.user == user && !topics.contains(&record.topic) {
                topics.push(record.topic);
            }
        }
        topics
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_dedupe_and_preserve_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = TopicStore::new(temp.path().join("topics.jsonl"));

        store.append("alex", "s1", "Childhood memories")?;
        store.append("alex", "s2", "Work")?;
        store.append("alex", "s3", "Childhood memories")?;
        store.append("sam", "s4", "Travel")?;

        assert_eq!(
            store.topics_for_user("alex"),
            vec!["Childhood memories".to_string(), "Work".to_string()]
        );
        assert_eq!(store.topics_for_user("sam"), vec!["Travel".to_string()]);
        Ok(())
    }

    #[test]
    fn missing_file_is_empty() {
        let store = TopicStore::new("/nonexistent/topics.jsonl");
        assert!(store.topics_for_user("alex").is_empty());
    }
}
