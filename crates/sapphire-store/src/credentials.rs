use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::write_atomic;

/// Environment variable checked for each LLM provider when no credential is
/// stored. The mapping is closed; unknown providers have no env fallback.
pub const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("claude", "ANTHROPIC_API_KEY"),
    ("fireworks", "FIREWORKS_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LlmCredential {
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SocksCredential {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct HomeAssistantCredential {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Credentials {
    #[serde(default)]
    llm: HashMap<String, LlmCredential>,
    #[serde(default)]
    socks: SocksCredential,
    #[serde(default)]
    homeassistant: HomeAssistantCredential,
}

impl Default for Credentials {
    fn default() -> Self {
        let mut llm = HashMap::new();
        for (provider, _) in PROVIDER_ENV_VARS {
            llm.insert(provider.to_string(), LlmCredential::default());
        }
        llm.insert("other".to_string(), LlmCredential::default());
        Self {
            llm,
            socks: SocksCredential::default(),
            homeassistant: HomeAssistantCredential::default(),
        }
    }
}

/// Credential storage outside the data directory proper.
///
/// If the file cannot be created the manager degrades to memory-only
/// operation; everything else keeps working, keys just don't survive restart.
pub struct CredentialsManager {
    path: PathBuf,
    creds: Mutex<Credentials>,
    writable: bool,
}

impl CredentialsManager {
    pub fn open(path: PathBuf) -> Self {
        let (creds, writable) = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(crate::StoreError::from)
                .and_then(|raw| serde_json::from_str::<Credentials>(&raw).map_err(Into::into))
            {
                Ok(c) => {
                    info!(path = %path.display(), "loaded credentials");
                    (c, true)
                }
                Err(e) => {
                    warn!("failed to load credentials, starting fresh: {e}");
                    (Credentials::default(), true)
                }
            }
        } else {
            let creds = Credentials::default();
            let writable = Self::persist(&path, &creds).is_ok();
            if !writable {
                warn!("cannot write credentials file, operating in memory only");
            }
            (creds, writable)
        };

        Self {
            path,
            creds: Mutex::new(creds),
            writable,
        }
    }

    /// Lookup order: stored value, then the provider's env var, then empty.
    pub fn llm_api_key(&self, provider: &str) -> String {
        let stored = {
            let creds = self.creds.lock().unwrap();
            creds
                .llm
                .get(provider)
                .map(|c| c.api_key.clone())
                .unwrap_or_default()
        };
        if !stored.is_empty() {
            return stored;
        }
        PROVIDER_ENV_VARS
            .iter()
            .find(|(p, _)| *p == provider)
            .and_then(|(_, var)| std::env::var(var).ok())
            .unwrap_or_default()
    }

    pub fn set_llm_api_key(&self, provider: &str, api_key: &str) -> Result<()> {
        let mut creds = self.creds.lock().unwrap();
        creds
            .llm
            .entry(provider.to_string())
            .or_default()
            .api_key = api_key.to_string();
        if self.writable {
            Self::persist(&self.path, &creds)?;
        }
        Ok(())
    }

    pub fn homeassistant_token(&self) -> String {
        self.creds.lock().unwrap().homeassistant.token.clone()
    }

    fn persist(path: &PathBuf, creds: &Credentials) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(creds)?;
        write_atomic(path, &bytes)?;

        // Owner-only on POSIX; secrets should not be group/world readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_key_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CredentialsManager::open(dir.path().join("credentials.json"));
        mgr.set_llm_api_key("openai", "sk-stored").unwrap();
        assert_eq!(mgr.llm_api_key("openai"), "sk-stored");
    }

    #[test]
    fn unknown_provider_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CredentialsManager::open(dir.path().join("credentials.json"));
        assert_eq!(mgr.llm_api_key("nonexistent"), "");
    }

    #[test]
    fn keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        CredentialsManager::open(path.clone())
            .set_llm_api_key("claude", "sk-ant-test")
            .unwrap();
        let mgr = CredentialsManager::open(path);
        assert_eq!(mgr.llm_api_key("claude"), "sk-ant-test");
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mgr = CredentialsManager::open(path.clone());
        mgr.set_llm_api_key("openai", "sk").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
