use std::path::PathBuf;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::validate_cron;
use crate::types::{ActivityEntry, Task};

/// Activity entries kept on disk and served to the UI.
pub const ACTIVITY_CAP: usize = 50;

#[derive(Serialize, Deserialize, Default)]
struct TasksFile {
    tasks: Vec<Task>,
}

#[derive(Serialize, Deserialize, Default)]
struct ActivityFile {
    activity: Vec<ActivityEntry>,
}

/// JSON-backed task and activity persistence.
///
/// Tasks live in a `DashMap` keyed by id — the scheduler's background loop
/// and the gateway's CRUD handlers touch it concurrently. The activity ring
/// stays behind a plain `Mutex`; it is an ordered list, not a keyed map.
pub struct TaskStore {
    tasks_path: PathBuf,
    activity_path: PathBuf,
    tasks: DashMap<String, Task>,
    activity: Mutex<Vec<ActivityEntry>>,
}

impl TaskStore {
    pub fn open(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let tasks_path = dir.join("tasks.json");
        let activity_path = dir.join("activity.json");

        let tasks: DashMap<String, Task> = if tasks_path.exists() {
            let raw = std::fs::read_to_string(&tasks_path)?;
            match serde_json::from_str::<TasksFile>(&raw) {
                Ok(file) => file.tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
                Err(e) => {
                    error!("failed to parse tasks file: {e}");
                    DashMap::new()
                }
            }
        } else {
            DashMap::new()
        };

        let activity: Vec<ActivityEntry> = if activity_path.exists() {
            let raw = std::fs::read_to_string(&activity_path)?;
            serde_json::from_str::<ActivityFile>(&raw)
                .map(|f| {
                    let skip = f.activity.len().saturating_sub(ACTIVITY_CAP);
                    f.activity.into_iter().skip(skip).collect()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        info!(tasks = tasks.len(), "continuity store loaded");
        Ok(Self {
            tasks_path,
            activity_path,
            tasks,
            activity: Mutex::new(activity),
        })
    }

    // --- task CRUD ---------------------------------------------------------

    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by(|a, b| a.created.cmp(&b.created));
        tasks
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|e| e.value().clone())
    }

    /// Create a task from a partial JSON body; the id and creation stamp are
    /// assigned here. The cron expression is validated up front.
    pub fn create(&self, mut body: serde_json::Value) -> Result<Task> {
        let obj = body
            .as_object_mut()
            .ok_or_else(|| SchedulerError::InvalidSchedule("body must be an object".into()))?;
        obj.insert("id".into(), serde_json::json!(Uuid::new_v4().to_string()));
        obj.insert(
            "created".into(),
            serde_json::json!(chrono::Local::now().to_rfc3339()),
        );
        obj.remove("last_run");

        let task: Task = serde_json::from_value(body)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
        validate_cron(&task.schedule)?;

        self.tasks.insert(task.id.clone(), task.clone());
        self.persist_tasks()?;
        info!(task_id = %task.id, name = %task.name, "task created");
        Ok(task)
    }

    /// Shallow-merge allowed fields into an existing task.
    pub fn update(&self, id: &str, delta: &serde_json::Map<String, serde_json::Value>) -> Result<Task> {
        if let Some(schedule) = delta.get("schedule").and_then(|s| s.as_str()) {
            validate_cron(schedule)?;
        }

        let task = self
            .get(id)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;

        let mut as_map = serde_json::to_value(&task)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        for (key, value) in delta {
            // id/created/last_run are managed here, not by the caller.
            if matches!(key.as_str(), "id" | "created" | "last_run") {
                continue;
            }
            if as_map.contains_key(key) {
                as_map.insert(key.clone(), value.clone());
            }
        }
        let updated: Task = serde_json::from_value(serde_json::Value::Object(as_map))
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        self.tasks.insert(id.to_string(), updated.clone());
        self.persist_tasks()?;
        info!(task_id = %id, "task updated");
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if self.tasks.remove(id).is_none() {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }
        self.persist_tasks()?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    pub fn mark_ran(&self, id: &str) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            entry.last_run = Some(chrono::Local::now().to_rfc3339());
        } else {
            return;
        }
        // The guard is released above; persisting iterates the map.
        if let Err(e) = self.persist_tasks() {
            error!("failed to persist last_run: {e}");
        }
    }

    fn persist_tasks(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&TasksFile { tasks: self.list() })?;
        let tmp = self.tasks_path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.tasks_path)?;
        Ok(())
    }

    // --- activity ring -----------------------------------------------------

    pub fn log_activity(&self, entry: ActivityEntry) {
        let mut activity = self.activity.lock().unwrap();
        activity.push(entry);
        let overflow = activity.len().saturating_sub(ACTIVITY_CAP);
        if overflow > 0 {
            activity.drain(..overflow);
        }
        let file = ActivityFile {
            activity: activity.clone(),
        };
        drop(activity);

        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                let tmp = self.activity_path.with_extension("tmp");
                if let Err(e) = std::fs::write(&tmp, &bytes)
                    .and_then(|_| std::fs::rename(&tmp, &self.activity_path))
                {
                    error!("failed to persist activity: {e}");
                }
            }
            Err(e) => error!("failed to serialize activity: {e}"),
        }
    }

    pub fn activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let activity = self.activity.lock().unwrap();
        let skip = activity.len().saturating_sub(limit);
        activity.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityStatus;
    use serde_json::json;

    fn store(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::open(dir.path().join("continuity")).unwrap()
    }

    #[test]
    fn create_validates_cron() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let err = s.create(json!({"name": "bad", "schedule": "nope"}));
        assert!(matches!(err, Err(SchedulerError::InvalidSchedule(_))));

        let task = s
            .create(json!({"name": "diary", "schedule": "0 21 * * *", "chat_target": "diary"}))
            .unwrap();
        assert_eq!(task.chat_target, "diary");
        assert!(s.get(&task.id).is_some());
    }

    #[test]
    fn tasks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let s = store(&dir);
            s.create(json!({"name": "t", "schedule": "*/5 * * * *"}))
                .unwrap()
                .id
        };
        let s = store(&dir);
        assert_eq!(s.get(&id).unwrap().schedule, "*/5 * * * *");
    }

    #[test]
    fn update_merges_allowed_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let task = s.create(json!({"name": "t", "schedule": "0 9 * * *"})).unwrap();

        let delta = json!({"chance": 50, "id": "hijack", "bogus": 1})
            .as_object()
            .unwrap()
            .clone();
        let updated = s.update(&task.id, &delta).unwrap();
        assert_eq!(updated.chance, 50);
        assert_eq!(updated.id, task.id);
    }

    #[test]
    fn update_rejects_bad_cron() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let task = s.create(json!({"name": "t", "schedule": "0 9 * * *"})).unwrap();
        let delta = json!({"schedule": "banana"}).as_object().unwrap().clone();
        assert!(s.update(&task.id, &delta).is_err());
    }

    #[test]
    fn mark_ran_stamps_last_run() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let task = s.create(json!({"name": "t", "schedule": "0 9 * * *"})).unwrap();
        assert!(s.get(&task.id).unwrap().last_run.is_none());
        s.mark_ran(&task.id);
        assert!(s.get(&task.id).unwrap().last_run.is_some());
    }

    #[test]
    fn activity_ring_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        for i in 0..(ACTIVITY_CAP + 10) {
            s.log_activity(ActivityEntry {
                timestamp: format!("t{i}"),
                task_id: "x".into(),
                task_name: "x".into(),
                status: ActivityStatus::Complete,
                details: json!({}),
            });
        }
        let activity = s.activity(100);
        assert_eq!(activity.len(), ACTIVITY_CAP);
        assert_eq!(activity.last().unwrap().timestamp, format!("t{}", ACTIVITY_CAP + 9));
    }
}
