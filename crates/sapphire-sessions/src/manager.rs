use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDateTime, Utc};
use sapphire_core::types::{ChatName, Message, Role, ToolCall};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::error::{Result, SessionError};
use crate::types::{ChatFile, ChatSettings};

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

struct Active {
    name: ChatName,
    chat: ChatFile,
}

/// Thread-safe manager for the active chat and the on-disk chat directory.
///
/// One `Mutex` serializes every read and write; file replacement is atomic
/// (write-temp + rename) so a crash mid-write never corrupts a chat.
pub struct SessionManager {
    dir: PathBuf,
    inner: Mutex<Active>,
}

impl SessionManager {
    /// Open the chat directory, creating it and the default chat if needed.
    pub fn open(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let default = ChatName::default_chat();
        let default_path = chat_path(&dir, &default);
        if !default_path.exists() {
            save_chat(&default_path, &ChatFile::empty())?;
            info!("created default chat");
        }
        let chat = load_chat(&default_path)?;
        Ok(Self {
            dir,
            inner: Mutex::new(Active {
                name: default,
                chat,
            }),
        })
    }

    // --- chat CRUD ---------------------------------------------------------

    pub fn list_chat_files(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }

    #[instrument(skip(self))]
    pub fn create_chat(&self, raw: &str) -> Result<ChatName> {
        let name = ChatName::sanitize(raw).ok_or_else(|| SessionError::InvalidName {
            raw: raw.to_string(),
        })?;
        let path = chat_path(&self.dir, &name);
        if path.exists() {
            return Err(SessionError::AlreadyExists {
                name: name.to_string(),
            });
        }
        save_chat(&path, &ChatFile::empty())?;
        info!(chat = %name, "chat created");
        Ok(name)
    }

    /// Delete a chat. The default chat is protected; deleting the active chat
    /// switches back to default and loads its settings.
    #[instrument(skip(self))]
    pub fn delete_chat(&self, raw: &str) -> Result<()> {
        let name = ChatName::sanitize(raw).ok_or_else(|| SessionError::InvalidName {
            raw: raw.to_string(),
        })?;
        if name.is_default() {
            return Err(SessionError::ReservedChat);
        }
        let path = chat_path(&self.dir, &name);
        if !path.exists() {
            return Err(SessionError::NotFound {
                name: name.to_string(),
            });
        }
        std::fs::remove_file(&path)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.name == name {
            let default = ChatName::default_chat();
            inner.chat = load_chat(&chat_path(&self.dir, &default))?;
            inner.name = default;
            info!("active chat deleted, switched to default");
        }
        Ok(())
    }

    /// Switch the active chat, loading messages and settings from disk.
    #[instrument(skip(self))]
    pub fn set_active_chat(&self, raw: &str) -> Result<ChatName> {
        let name = ChatName::sanitize(raw).ok_or_else(|| SessionError::InvalidName {
            raw: raw.to_string(),
        })?;
        let path = chat_path(&self.dir, &name);
        if !path.exists() {
            return Err(SessionError::NotFound {
                name: name.to_string(),
            });
        }
        let chat = load_chat(&path)?;
        let mut inner = self.inner.lock().unwrap();
        inner.name = name.clone();
        inner.chat = chat;
        Ok(name)
    }

    pub fn active_chat_name(&self) -> ChatName {
        self.inner.lock().unwrap().name.clone()
    }

    // --- messages ----------------------------------------------------------

    pub fn get_messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().chat.messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().chat.messages.len()
    }

    /// Number of user messages — the turn counter the state engine keys on.
    pub fn user_turn_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .chat
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count() as u64
    }

    pub fn append_user(&self, content: &str) -> Result<Message> {
        self.append(Role::User, content, Vec::new(), None, None, None)
    }

    pub fn append_assistant(&self, content: &str, tool_calls: Vec<ToolCall>) -> Result<Message> {
        self.append(Role::Assistant, content, tool_calls, None, None, None)
    }

    pub fn append_tool(
        &self,
        name: &str,
        content: &str,
        tool_call_id: &str,
        tool_inputs: Value,
    ) -> Result<Message> {
        self.append(
            Role::Tool,
            content,
            Vec::new(),
            Some(tool_call_id.to_string()),
            Some(name.to_string()),
            Some(tool_inputs),
        )
    }

    fn append(
        &self,
        role: Role,
        content: &str,
        tool_calls: Vec<ToolCall>,
        tool_call_id: Option<String>,
        name: Option<String>,
        tool_inputs: Option<Value>,
    ) -> Result<Message> {
        let mut inner = self.inner.lock().unwrap();
        let timestamp = next_timestamp(inner.chat.messages.last().map(|m| m.timestamp.as_str()));
        let message = Message {
            role,
            content: content.to_string(),
            timestamp,
            tool_calls,
            tool_call_id,
            name,
            tool_inputs,
        };
        inner.chat.messages.push(message.clone());
        self.persist(&inner)?;
        Ok(message)
    }

    /// Replace the content of the unique `(role, timestamp)` message.
    pub fn edit_message_by_timestamp(
        &self,
        role: Role,
        timestamp: &str,
        new_content: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let msg = inner
            .chat
            .messages
            .iter_mut()
            .find(|m| m.role == role && m.timestamp == timestamp)
            .ok_or_else(|| SessionError::MessageNotFound {
                timestamp: timestamp.to_string(),
            })?;
        msg.content = new_content.to_string();
        self.persist(&inner)
    }

    /// Remove the last `n` messages from the tail.
    pub fn remove_last_messages(&self, n: usize) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.chat.messages.len();
        let removed = n.min(len);
        inner.chat.messages.truncate(len - removed);
        self.persist(&inner)?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.chat.messages.clear();
        self.persist(&inner)
    }

    /// Drop the most recent user message whose content matches `text` and
    /// every message after it (regenerate flow).
    pub fn remove_from_user_message(&self, text: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner
            .chat
            .messages
            .iter()
            .rposition(|m| m.role == Role::User && m.content == text)
            .ok_or_else(|| SessionError::MessageNotFound {
                timestamp: String::new(),
            })?;
        inner.chat.messages.truncate(idx);
        self.persist(&inner)
    }

    /// Remove the assistant message at `timestamp` and everything after it.
    /// The user message that triggered the turn stays.
    pub fn remove_from_assistant_timestamp(&self, timestamp: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner
            .chat
            .messages
            .iter()
            .position(|m| m.role == Role::Assistant && m.timestamp == timestamp)
            .ok_or_else(|| SessionError::MessageNotFound {
                timestamp: timestamp.to_string(),
            })?;
        inner.chat.messages.truncate(idx);
        self.persist(&inner)
    }

    /// Remove only the final assistant message of the turn containing the
    /// assistant message at `timestamp` (continue flow). Tool results and
    /// user messages are untouched.
    pub fn remove_last_assistant_in_turn(&self, timestamp: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let start = inner
            .chat
            .messages
            .iter()
            .position(|m| m.role == Role::Assistant && m.timestamp == timestamp)
            .ok_or_else(|| SessionError::MessageNotFound {
                timestamp: timestamp.to_string(),
            })?;

        // The turn runs from `start` until the next user message.
        let mut last_assistant = None;
        for (offset, msg) in inner.chat.messages[start..].iter().enumerate() {
            match msg.role {
                Role::User => break,
                Role::Assistant => last_assistant = Some(start + offset),
                _ => {}
            }
        }
        if let Some(idx) = last_assistant {
            inner.chat.messages.remove(idx);
            self.persist(&inner)?;
        }
        Ok(())
    }

    /// Replace the active chat's messages wholesale (import).
    pub fn replace_messages(&self, messages: Vec<Message>) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let count = messages.len();
        inner.chat.messages = messages;
        self.persist(&inner)?;
        Ok(count)
    }

    // --- settings ----------------------------------------------------------

    pub fn get_chat_settings(&self) -> ChatSettings {
        self.inner.lock().unwrap().chat.settings.clone()
    }

    /// Settings of any chat; the active chat comes from memory, others from
    /// their file.
    pub fn get_chat_settings_for(&self, raw: &str) -> Result<ChatSettings> {
        let name = ChatName::sanitize(raw).ok_or_else(|| SessionError::InvalidName {
            raw: raw.to_string(),
        })?;
        {
            let inner = self.inner.lock().unwrap();
            if inner.name == name {
                return Ok(inner.chat.settings.clone());
            }
        }
        let path = chat_path(&self.dir, &name);
        if !path.exists() {
            return Err(SessionError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(load_chat(&path)?.settings)
    }

    /// Shallow-merge a delta into the active chat's settings and persist.
    pub fn update_chat_settings(&self, delta: &Map<String, Value>) -> Result<ChatSettings> {
        let mut inner = self.inner.lock().unwrap();
        inner.chat.settings = inner.chat.settings.merged(delta);
        self.persist(&inner)?;
        Ok(inner.chat.settings.clone())
    }

    fn persist(&self, inner: &Active) -> Result<()> {
        save_chat(&chat_path(&self.dir, &inner.name), &inner.chat)
    }
}

fn chat_path(dir: &Path, name: &ChatName) -> PathBuf {
    dir.join(format!("{name}.json"))
}

fn load_chat(path: &Path) -> Result<ChatFile> {
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(chat) => Ok(chat),
        Err(e) => {
            warn!(path = %path.display(), "unreadable chat file: {e}");
            Err(e.into())
        }
    }
}

fn save_chat(path: &Path, chat: &ChatFile) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(chat)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Produce a timestamp strictly greater than `last`. Wall time normally
/// suffices; when two appends land in the same microsecond the new stamp is
/// bumped one microsecond past the previous one.
fn next_timestamp(last: Option<&str>) -> String {
    let candidate = Utc::now().naive_utc();
    let bumped = match last.and_then(|l| NaiveDateTime::parse_from_str(l, TS_FORMAT).ok()) {
        Some(prev) if candidate <= prev => prev + chrono::Duration::microseconds(1),
        _ => candidate,
    };
    bumped.format(TS_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::open(dir.path().join("chats")).unwrap();
        (dir, mgr)
    }

    #[test]
    fn default_chat_exists_on_open() {
        let (_d, mgr) = manager();
        assert_eq!(mgr.active_chat_name().as_str(), "default");
        assert!(mgr.list_chat_files().contains(&"default".to_string()));
    }

    #[test]
    fn timestamps_strictly_increase() {
        let (_d, mgr) = manager();
        let mut last = String::new();
        for i in 0..20 {
            let msg = mgr.append_user(&format!("m{i}")).unwrap();
            assert!(msg.timestamp > last, "{} !> {}", msg.timestamp, last);
            last = msg.timestamp;
        }
    }

    #[test]
    fn create_duplicate_is_conflict() {
        let (_d, mgr) = manager();
        mgr.create_chat("Diary").unwrap();
        assert!(matches!(
            mgr.create_chat("diary"),
            Err(SessionError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn delete_default_refused() {
        let (_d, mgr) = manager();
        assert!(matches!(
            mgr.delete_chat("default"),
            Err(SessionError::ReservedChat)
        ));
    }

    #[test]
    fn deleting_active_switches_to_default() {
        let (_d, mgr) = manager();
        mgr.create_chat("diary").unwrap();
        mgr.set_active_chat("diary").unwrap();
        mgr.delete_chat("diary").unwrap();
        assert_eq!(mgr.active_chat_name().as_str(), "default");
    }

    #[test]
    fn chat_roundtrips_messages_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats");
        {
            let mgr = SessionManager::open(path.clone()).unwrap();
            mgr.append_user("hello").unwrap();
            mgr.append_assistant("hi there", Vec::new()).unwrap();
            let delta = serde_json::json!({"prompt": "storyteller"})
                .as_object()
                .unwrap()
                .clone();
            mgr.update_chat_settings(&delta).unwrap();
        }
        let mgr = SessionManager::open(path).unwrap();
        let msgs = mgr.get_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(mgr.get_chat_settings().prompt, "storyteller");
    }

    #[test]
    fn edit_by_timestamp() {
        let (_d, mgr) = manager();
        let msg = mgr.append_user("typo").unwrap();
        mgr.edit_message_by_timestamp(Role::User, &msg.timestamp, "fixed")
            .unwrap();
        assert_eq!(mgr.get_messages()[0].content, "fixed");
        assert!(mgr
            .edit_message_by_timestamp(Role::Assistant, &msg.timestamp, "x")
            .is_err());
    }

    #[test]
    fn remove_from_user_message_truncates_tail() {
        let (_d, mgr) = manager();
        mgr.append_user("first").unwrap();
        mgr.append_assistant("a1", Vec::new()).unwrap();
        mgr.append_user("second").unwrap();
        mgr.append_assistant("a2", Vec::new()).unwrap();
        mgr.remove_from_user_message("second").unwrap();
        let msgs = mgr.get_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "a1");
    }

    #[test]
    fn remove_from_assistant_keeps_user() {
        let (_d, mgr) = manager();
        mgr.append_user("question").unwrap();
        let a = mgr.append_assistant("answer", Vec::new()).unwrap();
        mgr.append_tool("time_date", "It's noon", "tc_1", serde_json::json!({}))
            .unwrap();
        mgr.remove_from_assistant_timestamp(&a.timestamp).unwrap();
        let msgs = mgr.get_messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::User);
    }

    #[test]
    fn remove_last_assistant_in_turn_spares_tools() {
        let (_d, mgr) = manager();
        mgr.append_user("question").unwrap();
        let first = mgr.append_assistant("", Vec::new()).unwrap();
        mgr.append_tool("roll_dice", "4", "tc_1", serde_json::json!({}))
            .unwrap();
        mgr.append_assistant("you rolled a 4", Vec::new()).unwrap();
        mgr.remove_last_assistant_in_turn(&first.timestamp).unwrap();
        let msgs = mgr.get_messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].role, Role::Tool);
    }
}
