use std::collections::HashMap;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use tracing::warn;

/// Named sets of short "urgent alert" strings injected into the system prompt
/// for persona variety. Stored as one JSON file: `{set_name: [strings]}`.
pub struct SpiceStore {
    path: PathBuf,
}

impl SpiceStore {
    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> HashMap<String, Vec<String>> {
        if !self.path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("malformed spice sets file: {e}");
                HashMap::new()
            }),
            Err(e) => {
                warn!("failed to read spice sets: {e}");
                HashMap::new()
            }
        }
    }

    pub fn set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.load().into_keys().collect();
        names.sort();
        names
    }

    /// Pick one random entry from the named set.
    pub fn pick(&self, set_name: &str) -> Option<String> {
        let sets = self.load();
        let entries = sets.get(set_name)?;
        entries.choose(&mut rand::thread_rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_returns_member_of_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spice_sets.json");
        std::fs::write(&path, r#"{"moods": ["be dramatic", "be terse"]}"#).unwrap();
        let store = SpiceStore::open(path);
        let picked = store.pick("moods").unwrap();
        assert!(["be dramatic", "be terse"].contains(&picked.as_str()));
        assert!(store.pick("missing").is_none());
    }
}
