use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of lifecycle event tags.
///
/// The audio kinds (tts/stt/wakeword) are carried for wire compatibility with
/// external audio components; nothing in the core emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AiTypingStart,
    AiTypingEnd,
    MessageAdded,
    MessageRemoved,
    ChatSwitched,
    ChatCleared,
    TtsPlaying,
    TtsStopped,
    SttRecordingStart,
    SttRecordingEnd,
    SttProcessing,
    WakewordDetected,
    ToolExecuting,
    ToolComplete,
    PromptChanged,
    AbilityChanged,
    SpiceChanged,
    ContextWarning,
    ContextCritical,
    LlmError,
    TtsError,
    SttError,
    ContinuityTaskStarting,
    ContinuityTaskComplete,
    ContinuityTaskSkipped,
    ContinuityTaskError,
    Keepalive,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde snake_case is the canonical spelling
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        f.write_str(&s)
    }
}
