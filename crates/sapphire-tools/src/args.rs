use serde_json::{Map, Value};
use tracing::debug;

/// Typed property bag for tool arguments.
///
/// The LLM's arguments arrive as a JSON string; this wrapper parses once and
/// offers typed accessors so raw maps never travel past the dispatch
/// boundary. Malformed JSON degrades to an empty bag — the tool then reports
/// its own missing-argument error.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    map: Map<String, Value>,
}

impl ToolArgs {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self { map },
            Ok(_) | Err(_) => {
                debug!("tool arguments were not a JSON object, using empty bag");
                Self::default()
            }
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(|v| v.as_str())
    }

    pub fn arg_string_or(&self, key: &str, default: &str) -> String {
        self.arg_str(key).unwrap_or(default).to_string()
    }

    /// Integer accessor; numeric strings are accepted because some models
    /// quote numbers.
    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        match self.map.get(key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        match self.map.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn arg_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).and_then(|v| v.as_bool())
    }

    pub fn arg_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.map.get(key).and_then(|v| v.as_array())
    }

    pub fn arg_value(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The original arguments, echoed into persisted tool messages.
    pub fn as_value(&self) -> Value {
        Value::Object(self.map.clone())
    }
}
