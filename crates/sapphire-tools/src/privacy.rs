use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ipnet::IpNet;
use sapphire_store::SettingsStore;
use tracing::{debug, info, warn};
use url::Url;

const WHITELIST_KEY: &str = "privacy_network_whitelist";

fn default_whitelist() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "localhost".to_string(),
        "192.168.0.0/16".to_string(),
        "10.0.0.0/8".to_string(),
        "172.16.0.0/12".to_string(),
    ]
}

/// Runtime-togglable outbound endpoint filter.
///
/// The enabled flag is initialized from the persisted `start_in_privacy_mode`
/// setting but is itself never persisted. DNS resolutions are cached until
/// the mode is toggled.
pub struct PrivacyGate {
    enabled: AtomicBool,
    settings: Arc<SettingsStore>,
    dns_cache: Mutex<HashMap<String, Option<IpAddr>>>,
}

impl PrivacyGate {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        let start_enabled = settings.get("start_in_privacy_mode", false);
        if start_enabled {
            info!("starting in privacy mode");
        }
        Self {
            enabled: AtomicBool::new(start_enabled),
            settings,
            dns_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle privacy mode. Returns false if already in the requested state.
    /// Toggling clears the DNS cache.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        if previous == enabled {
            return false;
        }
        self.dns_cache.lock().unwrap().clear();
        info!(
            "privacy mode {}",
            if enabled { "enabled" } else { "disabled" }
        );
        true
    }

    pub fn whitelist(&self) -> Vec<String> {
        self.settings.get(WHITELIST_KEY, default_whitelist())
    }

    /// Check whether an endpoint (URL, hostname, or IP) is allowed.
    /// Always true while privacy mode is off.
    pub fn is_allowed_endpoint(&self, url_or_host: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let whitelist = self.whitelist();

        let host = if url_or_host.contains("://") {
            match Url::parse(url_or_host) {
                Ok(u) => match u.host_str() {
                    Some(h) => h.to_string(),
                    None => {
                        warn!(endpoint = url_or_host, "no host in endpoint");
                        return false;
                    }
                },
                Err(e) => {
                    warn!(endpoint = url_or_host, "failed to parse URL: {e}");
                    return false;
                }
            }
        } else {
            url_or_host.to_string()
        };

        // Exact hostname entry.
        let host_lower = host.to_lowercase();
        if whitelist
            .iter()
            .filter(|w| !w.contains('/'))
            .any(|w| w.to_lowercase() == host_lower)
        {
            debug!(host, "allowed (hostname match)");
            return true;
        }

        // Host is itself an IP.
        if let Ok(ip) = host.parse::<IpAddr>() {
            if ip_in_whitelist(ip, &whitelist) {
                debug!(host, "allowed (IP match)");
                return true;
            }
            info!(host, "endpoint blocked by privacy mode");
            return false;
        }

        // Resolve and check the address.
        if let Some(ip) = self.resolve(&host) {
            if ip_in_whitelist(ip, &whitelist) {
                debug!(host, %ip, "allowed (resolved IP match)");
                return true;
            }
        }

        info!(host, "endpoint blocked by privacy mode");
        false
    }

    fn resolve(&self, host: &str) -> Option<IpAddr> {
        let mut cache = self.dns_cache.lock().unwrap();
        if let Some(cached) = cache.get(host) {
            return *cached;
        }
        let resolved = (host, 80u16)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|a| a.ip());
        if resolved.is_none() {
            warn!(host, "hostname resolution failed");
        }
        cache.insert(host.to_string(), resolved);
        resolved
    }
}

fn ip_in_whitelist(ip: IpAddr, whitelist: &[String]) -> bool {
    for entry in whitelist {
        if let Ok(net) = entry.parse::<IpNet>() {
            if net.contains(&ip) {
                return true;
            }
        } else if let Ok(single) = entry.parse::<IpAddr>() {
            if single == ip {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> (tempfile::TempDir, PrivacyGate) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::open(dir.path().join("settings.json"), serde_json::Map::new()).unwrap(),
        );
        (dir, PrivacyGate::new(settings))
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let (_d, gate) = gate();
        assert!(!gate.is_enabled());
        assert!(gate.is_allowed_endpoint("https://api.example.com/x"));
    }

    #[test]
    fn loopback_and_private_ranges_allowed() {
        let (_d, gate) = gate();
        gate.set_enabled(true);
        assert!(gate.is_allowed_endpoint("127.0.0.1"));
        assert!(gate.is_allowed_endpoint("http://127.0.0.1:8073/api"));
        assert!(gate.is_allowed_endpoint("192.168.1.50"));
        assert!(gate.is_allowed_endpoint("10.2.3.4"));
        assert!(gate.is_allowed_endpoint("172.20.0.1"));
        assert!(gate.is_allowed_endpoint("localhost"));
    }

    #[test]
    fn public_ip_blocked() {
        let (_d, gate) = gate();
        gate.set_enabled(true);
        assert!(!gate.is_allowed_endpoint("8.8.8.8"));
        assert!(!gate.is_allowed_endpoint("https://93.184.216.34/x"));
    }

    #[test]
    fn toggle_reports_change() {
        let (_d, gate) = gate();
        assert!(gate.set_enabled(true));
        assert!(!gate.set_enabled(true));
        assert!(gate.set_enabled(false));
    }

    #[test]
    fn custom_whitelist_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::open(dir.path().join("s.json"), serde_json::Map::new()).unwrap(),
        );
        settings
            .set(WHITELIST_KEY, json!(["127.0.0.1", "localhost"]), false)
            .unwrap();
        let gate = PrivacyGate::new(settings);
        gate.set_enabled(true);
        assert!(gate.is_allowed_endpoint("127.0.0.1"));
        assert!(!gate.is_allowed_endpoint("192.168.1.50"));
    }
}
