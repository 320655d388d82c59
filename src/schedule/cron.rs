//! Five-field cron schedule engine.
//!
//! The pattern grammar is deliberately small: minute, hour, day-of-month,
//! month, day-of-week, each either a fixed value or `*`. Day-of-week is
//! mutually exclusive with day-of-month/month. The next fire is found by
//! advancing field-by-field (minute, hour, then day-of-week or
//! day-of-month+month) to the nearest satisfying timestamp.

use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};

use super::{FireDecision, INFINITE_EXECUTIONS, Progress, ScheduleError, cap_executions};

/// Length of each month; February is given its leap-year length so a
/// Feb 29 pattern stays admissible.
const MONTH_LENGTHS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// A validated cron schedule. Fields are `None` for wildcards.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    start: DateTime<Utc>,
    stop: Option<DateTime<Utc>>,
    max_executions: u32,

    minute: Option<u32>,
    hour: Option<u32>,
    day_of_month: Option<u32>,
    month: Option<u32>,
    day_of_week: Option<u32>,
}

impl CronSchedule {
    pub fn new(
        pattern: &str,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
        max_executions: u32,
    ) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = pattern.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let minute = parse_field(fields[0], "minute", 0, 59)?;
        let hour = parse_field(fields[1], "hour", 0, 23)?;
        let day_of_month = parse_field(fields[2], "day of month", 1, 31)?;
        let month = parse_field(fields[3], "month", 1, 12)?;
        let day_of_week = parse_field(fields[4], "day of week", 0, 6)?;

        if day_of_week.is_some() && (day_of_month.is_some() || month.is_some()) {
            return Err(ScheduleError::ExclusiveFields);
        }
        if let (Some(day), Some(month)) = (day_of_month, month) {
            if day > MONTH_LENGTHS[(month - 1) as usize] {
                return Err(ScheduleError::ImpossibleDay { day, month });
            }
        }

        Ok(Self {
            start,
            stop,
            max_executions,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    pub fn next_fire(&self, progress: &Progress, now: DateTime<Utc>) -> FireDecision {
        if self.max_executions != INFINITE_EXECUTIONS
            && progress.completed_executions >= self.max_executions
        {
            return FireDecision::Done;
        }

        // advance() is inclusive, so anchoring the first-ever search at
        // `start` keeps a fire at `start` itself admissible. Later searches
        // move strictly past the last recorded slot.
        let base = match progress.last_execution {
            None => self.start,
            Some(last) => last + Duration::minutes(1),
        };

        let mut candidate = self.advance(base);
        if let Some(stop) = self.stop {
            if candidate > stop {
                return FireDecision::Done;
            }
        }

        if candidate > now {
            return FireDecision::Fire {
                at: candidate,
                execution_number: progress.completed_executions + 1,
            };
        }

        // Due: fire once now, counting every slot already behind us as
        // compensated.
        let mut execution_number = progress.completed_executions + 1;
        loop {
            let following = self.advance(candidate + Duration::minutes(1));
            if following > now {
                break;
            }
            if let Some(stop) = self.stop {
                if following > stop {
                    break;
                }
            }
            candidate = following;
            execution_number += 1;
        }

        FireDecision::Fire {
            at: now,
            execution_number: cap_executions(execution_number, self.max_executions),
        }
    }

    /// Nearest satisfying timestamp at or after `t`, one aligning pass per
    /// field.
    fn advance(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let mut res = t;

        if let Some(minute) = self.minute {
            let mut behind = i64::from(minute) - i64::from(res.minute());
            if behind < 0 {
                behind += 60;
            }
            res += Duration::minutes(behind);
        }

        if let Some(hour) = self.hour {
            let mut behind = i64::from(hour) - i64::from(res.hour());
            if behind < 0 {
                behind += 24;
            }
            res += Duration::hours(behind);
        }

        if let Some(day_of_week) = self.day_of_week {
            let mut behind =
                i64::from(day_of_week) - i64::from(res.weekday().num_days_from_sunday());
            if behind < 0 {
                behind += 7;
            }
            res += Duration::days(behind);
        } else {
            let mut days_behind: i64 = 0;
            if let Some(day_of_month) = self.day_of_month {
                days_behind = i64::from(day_of_month) - i64::from(res.day());
                if days_behind < 0 {
                    days_behind += i64::from(MONTH_LENGTHS[res.month0() as usize]);
                }
            }

            let mut months_behind: u32 = 0;
            if let Some(month) = self.month {
                let mut behind = i64::from(month) - i64::from(res.month());
                if behind < 0 {
                    behind += 12;
                }
                months_behind = behind as u32;
            }

            res = res
                .checked_add_months(Months::new(months_behind))
                .unwrap_or(res)
                + Duration::days(days_behind);
        }

        res
    }
}

fn parse_field(
    raw: &str,
    field: &'static str,
    min: u32,
    max: u32,
) -> Result<Option<u32>, ScheduleError> {
    if raw == "*" {
        return Ok(None);
    }
    let value: u32 = raw.parse().map_err(|_| ScheduleError::NotANumber {
        field,
        value: raw.to_string(),
    })?;
    if value < min || value > max {
        return Err(ScheduleError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(Some(value))
}
