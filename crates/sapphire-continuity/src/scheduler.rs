use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sapphire_events::EventBus;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, SchedulerError};
use crate::executor::{ContinuityExecutor, RunResult};
use crate::schedule::{cron_matches_minute, next_occurrences};
use crate::store::TaskStore;
use crate::types::{ActivityEntry, ActivityStatus, Task};

/// Seconds between schedule checks.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Timeline queries are capped at one week.
const MAX_TIMELINE_HOURS: i64 = 168;
const MAX_OCCURRENCES_PER_TASK: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub next_task: Option<NextTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextTask {
    pub id: String,
    pub name: String,
    pub scheduled_for: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub task_id: String,
    pub task_name: String,
    pub scheduled_for: String,
    pub chance: u32,
}

/// Background evaluator: wakes every 30 seconds, fires enabled tasks whose
/// cron matches the current minute, gated by cooldown and chance.
///
/// Matching is at-most-once per minute per task; fires missed while the
/// process was down are lost (no catch-up).
pub struct ContinuityScheduler {
    store: Arc<TaskStore>,
    executor: Arc<ContinuityExecutor>,
    bus: EventBus,
    running: AtomicBool,
}

impl ContinuityScheduler {
    pub fn new(store: Arc<TaskStore>, executor: Arc<ContinuityExecutor>, bus: EventBus) -> Self {
        Self {
            store,
            executor,
            bus,
            running: AtomicBool::new(false),
        }
    }

    /// Main loop. Returns when `shutdown` broadcasts true; the interval tick
    /// and the shutdown signal race, so stop latency stays under a second.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.running.store(true, Ordering::Relaxed);
        info!("continuity scheduler started");

        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_and_run().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("continuity scheduler shutting down");
                        break;
                    }
                }
            }
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// One check cycle: evaluate every enabled task against the current
    /// minute. A task that errors does not stop the sweep.
    async fn check_and_run(&self) {
        let now = chrono::Local::now();
        let tasks = self.store.list();
        if tasks.is_empty() {
            return;
        }
        debug!(count = tasks.len(), "checking continuity tasks");

        for task in tasks {
            if !task.enabled {
                continue;
            }
            if !cron_matches_minute(&task.schedule, now) {
                continue;
            }
            info!(task = %task.name, schedule = %task.schedule, "cron matched");

            if !self.cooldown_passed(&task, now) {
                info!(
                    task = %task.name,
                    cooldown = task.cooldown_minutes,
                    "skipped: still in cooldown"
                );
                continue;
            }

            if task.chance < 100 {
                let roll = rand::thread_rng().gen_range(1..=100u32);
                if roll > task.chance {
                    info!(task = %task.name, roll, threshold = task.chance, "skipped by chance");
                    self.log_activity(
                        &task,
                        ActivityStatus::Skipped,
                        json!({"reason": "chance", "roll": roll, "threshold": task.chance}),
                    );
                    continue;
                }
            }

            self.fire(&task, json!({})).await;
        }
    }

    /// Execute one task with activity logging and last-run bookkeeping.
    async fn fire(&self, task: &Task, detail: serde_json::Value) -> RunResult {
        self.log_activity(task, ActivityStatus::Started, detail.clone());

        let result = self.executor.run(task).await;
        self.store.mark_ran(&task.id);

        let status = if result.success {
            ActivityStatus::Complete
        } else {
            ActivityStatus::Error
        };
        let mut details = detail;
        if let Some(obj) = details.as_object_mut() {
            obj.insert("responses".into(), json!(result.responses.len()));
            obj.insert("errors".into(), json!(result.errors));
        }
        self.log_activity(task, status, details);
        if !result.success {
            error!(task = %task.name, errors = ?result.errors, "task run failed");
        }
        result
    }

    /// Manually trigger a task immediately, bypassing schedule, cooldown,
    /// and the outer chance gate.
    pub async fn run_task_now(&self, task_id: &str) -> Result<RunResult> {
        let task = self
            .store
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        info!(task = %task.name, "manual run");
        Ok(self.fire(&task, json!({"manual": true})).await)
    }

    fn cooldown_passed(&self, task: &Task, now: chrono::DateTime<chrono::Local>) -> bool {
        if task.cooldown_minutes == 0 {
            return true;
        }
        let Some(last_run) = &task.last_run else {
            return true;
        };
        match chrono::DateTime::parse_from_rfc3339(last_run) {
            Ok(last) => {
                let elapsed = now.signed_duration_since(last).num_minutes();
                elapsed >= task.cooldown_minutes as i64
            }
            Err(_) => true,
        }
    }

    fn log_activity(&self, task: &Task, status: ActivityStatus, details: serde_json::Value) {
        let entry = ActivityEntry {
            timestamp: chrono::Local::now().to_rfc3339(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status,
            details,
        };
        self.store.log_activity(entry.clone());
        self.bus.publish(
            status.event_kind(),
            serde_json::to_value(&entry).unwrap_or_default(),
        );
    }

    // --- introspection -----------------------------------------------------

    pub fn status(&self) -> SchedulerStatus {
        let tasks = self.store.list();
        let now = chrono::Local::now();
        let horizon = now + chrono::Duration::hours(MAX_TIMELINE_HOURS);

        let mut next: Option<(chrono::DateTime<chrono::Local>, NextTask)> = None;
        for task in tasks.iter().filter(|t| t.enabled) {
            if let Some(fire) = next_occurrences(&task.schedule, now, horizon, 1).first() {
                if next.as_ref().map(|(t, _)| fire < t).unwrap_or(true) {
                    next = Some((
                        *fire,
                        NextTask {
                            id: task.id.clone(),
                            name: task.name.clone(),
                            scheduled_for: fire.to_rfc3339(),
                        },
                    ));
                }
            }
        }

        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            total_tasks: tasks.len(),
            enabled_tasks: tasks.iter().filter(|t| t.enabled).count(),
            next_task: next.map(|(_, t)| t),
        }
    }

    pub fn activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.store.activity(limit)
    }

    /// Upcoming fires of every enabled task within the window (≤ 168 h).
    pub fn timeline(&self, hours: i64) -> Vec<TimelineEntry> {
        let hours = hours.clamp(1, MAX_TIMELINE_HOURS);
        let now = chrono::Local::now();
        let until = now + chrono::Duration::hours(hours);

        let mut timeline: Vec<TimelineEntry> = Vec::new();
        for task in self.store.list().iter().filter(|t| t.enabled) {
            for fire in next_occurrences(&task.schedule, now, until, MAX_OCCURRENCES_PER_TASK) {
                timeline.push(TimelineEntry {
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                    scheduled_for: fire.to_rfc3339(),
                    chance: task.chance,
                });
            }
        }
        timeline.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for));
        timeline
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }
}
