use std::path::PathBuf;

use crate::sessions::InterviewSession;

/// Caller-side persistence for the interview value object, one file per
/// user under `sessions/`. Stands in for the browser session store of the
/// hosted product: state is loaded before a turn and written back after.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    /// Missing or unreadable state is simply absent; callers treat that as
    /// "start a new session", never as a failure.
    pub fn load(&self, user: &str) -> Option<InterviewSession> {
        let raw = std::fs::read_to_string(self.path_for(user)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, user: &str, session: &InterviewSession) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(user), serde_json::to_string_pretty(session)?)?;
        Ok(())
    }

    pub fn clear(&self, user: &str) -> anyhow::Result<()> {
        let path = self.path_for(user);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear_cycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path().join("sessions"));

        assert!(store.load("alex").is_none());

        let session = InterviewSession::start("Alex", Vec::new()).unwrap();
        store.save("alex", &session)?;
        assert_eq!(store.load("alex"), Some(session));

        store.clear("alex")?;
        assert!(store.load("alex").is_none());
        Ok(())
    }

    #[test]
    fn clear_on_missing_state_is_fine() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path().join("sessions"));
        store.clear("alex")?;
        Ok(())
    }
}
