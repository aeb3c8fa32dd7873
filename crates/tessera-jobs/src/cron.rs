//! Cron expression parsing.
//!
//! Accepts the classic five-field form (minute resolution) as well as the
//! six and seven field forms the `cron` crate understands (seconds first,
//! optional year last). Five-field expressions get a `0` seconds field.

use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses and validates an expression.
    pub fn parse(expression: &str) -> SchedulerResult<Self> {
        let normalized = normalize(expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            SchedulerError::InvalidSchedule(format!("Invalid cron expression '{}': {}", expression, e))
        })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as given (trimmed).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

fn normalize(expression: &str) -> SchedulerResult<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        0 => Err(SchedulerError::InvalidSchedule(
            "Cron expression cannot be empty".to_string(),
        )),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "Cron expression '{}' has {} fields (expected 5, 6 or 7)",
            expression, n
        ))),
    }
}

/// Commonly used expressions.
pub mod expressions {
    /// Every minute.
    pub const EVERY_MINUTE: &str = "* * * * *";
    /// Every hour on the hour.
    pub const HOURLY: &str = "0 * * * *";
    /// Every day at midnight.
    pub const DAILY_MIDNIGHT: &str = "0 0 * * *";
}
