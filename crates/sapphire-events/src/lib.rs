//! Single-process pub/sub event bus with a replay buffer for late subscribers.
//!
//! Every component publishes lifecycle events here; SSE handlers subscribe.
//! Publishing never blocks: a subscriber whose queue is full loses that event
//! (with a logged warning), and subscribers whose receiver is gone are reaped
//! on the next publish.

mod bus;
mod kind;

pub use bus::{EventBus, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
pub use kind::EventKind;

use serde::{Deserialize, Serialize};

/// A published lifecycle event as it appears on the wire:
/// `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Wall-clock seconds with fractional part.
    pub timestamp: f64,
}

impl Event {
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: now_secs(),
        }
    }

    pub fn keepalive() -> Self {
        Self::new(EventKind::Keepalive, serde_json::Value::Object(Default::default()))
    }
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
