//! Schedule engines - pure functions from (progress, now) to the next fire.
//!
//! Two variants exist: a fixed-interval grid and a five-field cron pattern.
//! Both share the catch-up convention: when the computed next fire is
//! already in the past the timer fires once *now* and every intervening
//! slot is silently compensated - the reported execution number jumps past
//! the missed slots instead of firing once per slot.

mod cron;
mod interval;

pub use cron::CronSchedule;
pub use interval::IntervalSchedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel for "no execution bound".
pub const INFINITE_EXECUTIONS: u32 = 0;

/// Mutable, monotonically advancing execution state of a timer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Schedule slots consumed so far (compensated slots included).
    pub completed_executions: u32,
    /// Fire time recorded for the highest consumed slot, unset before the
    /// first fire.
    pub last_execution: Option<DateTime<Utc>>,
}

/// Immutable schedule configuration, as carried by create records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleConfig {
    Cron {
        /// Five-field pattern: minute, hour, day-of-month, month,
        /// day-of-week. Each field is a fixed value or `*`.
        pattern: String,
        start: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<DateTime<Utc>>,
        /// 0 means infinite.
        max_executions: u32,
    },
    Interval {
        period_ns: i64,
        start: DateTime<Utc>,
        /// 0 means infinite.
        max_executions: u32,
    },
}

/// Validation errors for schedule configurations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, got {0}")]
    FieldCount(usize),
    #[error("cron {field}: {value:?} is not a number or '*'")]
    NotANumber { field: &'static str, value: String },
    #[error("cron {field}: got {value}, expected in range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("cron pattern can't fix day of week together with day of month or month")]
    ExclusiveFields,
    #[error("cron day {day} never occurs in month {month}")]
    ImpossibleDay { day: u32, month: u32 },
    #[error("interval period must be positive, got {0}ns")]
    NonPositivePeriod(i64),
}

/// Outcome of asking a schedule for its next fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// The schedule is exhausted; the timer must never be scheduled again.
    Done,
    Fire {
        /// When to fire. Equal to `now` when the slot was already due.
        at: DateTime<Utc>,
        /// The slot count the progress cursor holds after this fire, with
        /// compensated slots folded in.
        execution_number: u32,
    },
}

/// A validated, ready-to-query schedule engine.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(CronSchedule),
    Interval(IntervalSchedule),
}

impl Schedule {
    /// Validates the configuration and builds the engine.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ScheduleError> {
        match config {
            ScheduleConfig::Cron {
                pattern,
                start,
                stop,
                max_executions,
            } => Ok(Schedule::Cron(CronSchedule::new(
                pattern,
                *start,
                *stop,
                *max_executions,
            )?)),
            ScheduleConfig::Interval {
                period_ns,
                start,
                max_executions,
            } => Ok(Schedule::Interval(IntervalSchedule::new(
                *period_ns,
                *start,
                *max_executions,
            )?)),
        }
    }

    /// Computes the next fire for the given progress, or reports exhaustion.
    pub fn next_fire(&self, progress: &Progress, now: DateTime<Utc>) -> FireDecision {
        match self {
            Schedule::Cron(cron) => cron.next_fire(progress, now),
            Schedule::Interval(interval) => interval.next_fire(progress, now),
        }
    }
}

/// Caps an execution number at the configured bound. Compensation may skip
/// the cursor past slots that cannot exist once the bound is reached.
pub(crate) fn cap_executions(execution_number: u32, max_executions: u32) -> u32 {
    if max_executions == INFINITE_EXECUTIONS {
        execution_number
    } else {
        execution_number.min(max_executions)
    }
}
