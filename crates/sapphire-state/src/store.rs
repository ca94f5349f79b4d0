use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rusqlite::Connection;

use crate::db::open_db;
use crate::engine::StateEngine;
use crate::error::Result;

/// Owner of the shared state database and the live per-chat engines.
///
/// Engines are created lazily and kept for the process lifetime; the handle
/// map is a `DashMap` so concurrent requests for different chats don't
/// contend, while each engine serializes its own mutations behind its
/// `Mutex`. All engines share one SQLite connection (single writer, WAL
/// readers).
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
    presets_dir: PathBuf,
    engines: DashMap<String, Arc<Mutex<StateEngine>>>,
}

impl StateStore {
    pub fn open(db_path: &std::path::Path, presets_dir: PathBuf) -> Result<Self> {
        let conn = open_db(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            presets_dir,
            engines: DashMap::new(),
        })
    }

    /// The engine for a chat, created and loaded on first use.
    pub fn engine(&self, chat_name: &str) -> Arc<Mutex<StateEngine>> {
        self.engines
            .entry(chat_name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(StateEngine::new(
                    chat_name,
                    Arc::clone(&self.conn),
                    self.presets_dir.clone(),
                )))
            })
            .value()
            .clone()
    }

    /// Forget a chat's live engine (its rows stay in the DB).
    pub fn drop_engine(&self, chat_name: &str) {
        self.engines.remove(chat_name);
    }

    pub fn preset_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.presets_dir) {
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
}
