use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::privacy::PrivacyGate;
use crate::{Tool, ToolArgs, ToolResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_BODY_CHARS: usize = 8000;

/// Fetch a URL and return its body text. Network tool — every request is
/// checked against the privacy gate before any connection is made.
pub struct WebFetch {
    gate: Arc<PrivacyGate>,
    client: reqwest::Client,
}

impl WebFetch {
    pub fn new(gate: Arc<PrivacyGate>) -> Self {
        Self {
            gate,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebFetch {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body as text."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Full URL to fetch (http or https)"}
            },
            "required": ["url"]
        })
    }

    fn network(&self) -> bool {
        true
    }

    async fn execute(&self, args: ToolArgs) -> ToolResult {
        let Some(url) = args.arg_str("url") else {
            return ToolResult::error("Error: url is required");
        };

        if !self.gate.is_allowed_endpoint(url) {
            info!(url, "web_fetch blocked by privacy mode");
            return ToolResult::error(format!(
                "Blocked by privacy mode: '{url}' is not on the network whitelist"
            ));
        }

        match self.client.get(url).timeout(FETCH_TIMEOUT).send().await {
            Ok(resp) => {
                let status = resp.status();
                match resp.text().await {
                    Ok(mut body) => {
                        if body.len() > MAX_BODY_CHARS {
                            body.truncate(MAX_BODY_CHARS);
                            body.push_str("\n[... truncated ...]");
                        }
                        if status.is_success() {
                            ToolResult::success(body)
                        } else {
                            ToolResult::error(format!("HTTP {status}: {body}"))
                        }
                    }
                    Err(e) => ToolResult::error(format!("Failed to read response: {e}")),
                }
            }
            Err(e) => {
                warn!(url, "web_fetch failed: {e}");
                ToolResult::error(format!("Request failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapphire_store::SettingsStore;

    #[tokio::test]
    async fn privacy_mode_blocks_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::open(dir.path().join("s.json"), serde_json::Map::new()).unwrap(),
        );
        settings
            .set(
                "privacy_network_whitelist",
                serde_json::json!(["127.0.0.1", "localhost"]),
                false,
            )
            .unwrap();
        let gate = Arc::new(PrivacyGate::new(settings));
        gate.set_enabled(true);

        let tool = WebFetch::new(gate);
        let result = tool
            .execute(ToolArgs::parse(r#"{"url": "https://api.example.com/x"}"#))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("privacy mode"));
    }
}
