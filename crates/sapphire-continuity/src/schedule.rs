//! Five-field cron handling.
//!
//! Tasks use `minute hour day-of-month month day-of-week`; the `cron` crate
//! wants a seconds field, so expressions are normalized with a leading `0`.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Local, Timelike};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

fn parse(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 5 fields (minute hour day month weekday), got {fields}"
        )));
    }
    Schedule::from_str(&format!("0 {expr}"))
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

/// Reject invalid expressions at task create/update time.
pub fn validate_cron(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// Whether the expression fires in the current minute.
///
/// Advances from one minute before `now` and checks that the next fire lands
/// in `now`'s minute — at-most-once per matching minute per task.
pub fn cron_matches_minute(expr: &str, now: DateTime<Local>) -> bool {
    let Ok(schedule) = parse(expr) else {
        return false;
    };
    let from = now - Duration::minutes(1);
    schedule
        .after(&from)
        .next()
        .map(|next| {
            next.year() == now.year()
                && next.month() == now.month()
                && next.day() == now.day()
                && next.hour() == now.hour()
                && next.minute() == now.minute()
        })
        .unwrap_or(false)
}

/// Up to `max` upcoming fire times within the window.
pub fn next_occurrences(
    expr: &str,
    from: DateTime<Local>,
    until: DateTime<Local>,
    max: usize,
) -> Vec<DateTime<Local>> {
    let Ok(schedule) = parse(expr) else {
        return Vec::new();
    };
    schedule
        .after(&from)
        .take(max)
        .take_while(|t| *t <= until)
        .collect()
}
