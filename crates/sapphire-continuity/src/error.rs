use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron schedule: {0}")]
    InvalidSchedule(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
