use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8073;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (sapphire.toml + SAPPHIRE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SapphireConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub continuity: ContinuityConfig,
}

impl Default for SapphireConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            data: DataConfig::default(),
            llm: LlmConfig::default(),
            events: EventsConfig::default(),
            continuity: ContinuityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared API key expected in the `X-API-Key` header. `None` rejects all
    /// authenticated routes until configured.
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            api_key: None,
        }
    }
}

/// Where chats, settings, tasks, presets, and the state DB live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible endpoint (without trailing slash).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the replay ring delivered to late subscribers.
    #[serde(default = "default_replay_size")]
    pub replay_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            replay_size: default_replay_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sapphire", home)
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_replay_size() -> usize {
    50
}
fn bool_true() -> bool {
    true
}

impl SapphireConfig {
    /// Load config from a TOML file with SAPPHIRE_* env var overrides.
    ///
    /// Missing files are fine — defaults apply and env vars still override.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SapphireConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SAPPHIRE_").split("_"))
            .extract()
            .map_err(|e| crate::error::SapphireError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sapphire/sapphire.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SapphireConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.events.replay_size, 50);
        assert!(cfg.continuity.enabled);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = SapphireConfig::load(Some("/nonexistent/sapphire.toml")).unwrap();
        assert_eq!(cfg.gateway.bind, DEFAULT_BIND);
    }
}
