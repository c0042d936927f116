use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Insights granted to a user who has never been seen before.
pub const DEFAULT_FREE_INSIGHTS: u64 = 10;

/// Per-user account state: the consumable insight balance that gates
/// non-premium feature use, the premium flag that bypasses it, and the
/// latest type an interview concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user: String,
    pub insights: u64,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub latest_type: Option<String>,
    pub updated_at: String,
}

impl Profile {
    fn fresh(user: &str) -> Self {
        Self {
            user: user.to_string(),
            insights: DEFAULT_FREE_INSIGHTS,
            premium: false,
            latest_type: None,
            updated_at: now_utc_iso(),
        }
    }

    /// Whether a completion feature may run at all for this profile.
    pub fn can_spend(&self) -> bool {
        self.premium || self.insights > 0
    }

    /// Spends one insight. Premium profiles spend nothing. Returns false
    /// when the balance is exhausted.
    pub fn spend(&mut self) -> bool {
        if self.premium {
            return true;
        }
        if self.insights == 0 {
            return false;
        }
        self.insights -= 1;
        true
    }
}

/// `profiles/<user>.json`, read-modify-written per request.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    /// Loads the profile, minting a fresh one with the free-insight grant
    /// for users never seen before. Corrupt files are replaced the same
    /// way.
    pub fn load(&self, user: &str) -> Profile {
        let path = self.path_for(user);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Profile::fresh(user))
    }

    pub fn save(&self, profile: &Profile) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut stamped = profile.clone();
        stamped.updated_at = now_utc_iso();
        std::fs::write(
            self.path_for(&profile.user),
            serde_json::to_string_pretty(&stamped)?,
        )?;
        Ok(())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_user_gets_free_insights() {
        let temp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(temp.path().join("profiles"));
        let profile = store.load("alex");
        assert_eq!(profile.insights, DEFAULT_FREE_INSIGHTS);
        assert!(!profile.premium);
        assert!(profile.latest_type.is_none());
    }

    #[test]
    fn spend_decrements_until_exhausted() {
        let temp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(temp.path().join("profiles"));
        let mut profile = store.load("alex");
        profile.insights = 1;
        assert!(profile.spend());
        assert!(!profile.spend());
        assert!(!profile.can_spend());
    }

    #[test]
    fn premium_never_spends_balance() {
        let temp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(temp.path().join("profiles"));
        let mut profile = store.load("alex");
        profile.premium = true;
        profile.insights = 0;
        assert!(profile.can_spend());
        assert!(profile.spend());
        assert_eq!(profile.insights, 0);
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ProfileStore::new(temp.path().join("profiles"));
        let mut profile = store.load("alex");
        profile.insights = 3;
        profile.latest_type = Some("INFJ".to_string());
        store.save(&profile)?;

        let loaded = store.load("alex");
        assert_eq!(loaded.insights, 3);
        assert_eq!(loaded.latest_type.as_deref(), Some("INFJ"));
        Ok(())
    }
}
