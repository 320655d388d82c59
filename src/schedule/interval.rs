//! Fixed-interval schedule engine.

use chrono::{DateTime, Duration, Utc};

use super::{FireDecision, INFINITE_EXECUTIONS, Progress, ScheduleError, cap_executions};

/// A schedule that fires on a fixed grid: `start + period * slot`.
///
/// The grid is anchored on the slot count, not on wall-clock drift, so a
/// dead period never shifts subsequent fire times.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    start: DateTime<Utc>,
    period_ns: i64,
    max_executions: u32,
}

impl IntervalSchedule {
    pub fn new(period_ns: i64, start: DateTime<Utc>, max_executions: u32) -> Result<Self, ScheduleError> {
        if period_ns <= 0 {
            return Err(ScheduleError::NonPositivePeriod(period_ns));
        }
        Ok(Self {
            start,
            period_ns,
            max_executions,
        })
    }

    pub fn next_fire(&self, progress: &Progress, now: DateTime<Utc>) -> FireDecision {
        if self.max_executions != INFINITE_EXECUTIONS
            && progress.completed_executions >= self.max_executions
        {
            return FireDecision::Done;
        }

        let slots = i64::from(progress.completed_executions);
        let ideal = self.start + Duration::nanoseconds(self.period_ns.saturating_mul(slots));

        if ideal > now {
            return FireDecision::Fire {
                at: ideal,
                execution_number: progress.completed_executions + 1,
            };
        }

        // Due: fire once now, silently compensating every whole period that
        // has elapsed since the ideal slot.
        let elapsed = (now - ideal).num_nanoseconds().unwrap_or(i64::MAX);
        let skipped = u32::try_from(elapsed / self.period_ns).unwrap_or(u32::MAX);
        let execution_number = progress
            .completed_executions
            .saturating_add(skipped)
            .saturating_add(1);

        FireDecision::Fire {
            at: now,
            execution_number: cap_executions(execution_number, self.max_executions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn secs(n: i64) -> i64 {
        n * 1_000_000_000
    }

    fn progress(completed: u32, last: Option<i64>) -> Progress {
        Progress {
            completed_executions: completed,
            last_execution: last.map(at),
        }
    }

    #[test]
    fn future_slot_is_returned_unchanged() {
        let sched = IntervalSchedule::new(secs(10), at(0), 4).unwrap();
        let decision = sched.next_fire(&progress(1, Some(0)), at(0));
        assert_eq!(
            decision,
            FireDecision::Fire {
                at: at(10),
                execution_number: 2
            }
        );
    }

    #[test]
    fn exhausted_when_completed_reaches_bound() {
        let sched = IntervalSchedule::new(secs(10), at(0), 4).unwrap();
        assert_eq!(sched.next_fire(&progress(4, Some(30)), at(0)), FireDecision::Done);
    }

    #[test]
    fn due_slot_fires_now_and_compensates_whole_periods() {
        // completed = c, now = start + period * (c + 2.5): fires now with
        // the cursor advanced to c + 3, two whole periods absorbed.
        let c = 30;
        let sched = IntervalSchedule::new(secs(60), at(0), INFINITE_EXECUTIONS).unwrap();
        let now = at(60 * (i64::from(c)) + 150);
        let decision = sched.next_fire(&progress(c, Some(60 * i64::from(c))), now);
        assert_eq!(
            decision,
            FireDecision::Fire {
                at: now,
                execution_number: c + 3
            }
        );
    }

    #[test]
    fn catch_up_is_capped_at_the_execution_bound() {
        // Two slots missed but only two executions exist in total: the
        // compensating fire lands on the final slot number.
        let sched = IntervalSchedule::new(secs(60), at(0), 2).unwrap();
        let now = at(150);
        let decision = sched.next_fire(&Progress::default(), now);
        assert_eq!(
            decision,
            FireDecision::Fire {
                at: now,
                execution_number: 2
            }
        );
    }

    #[test]
    fn first_fire_lands_on_start() {
        let sched = IntervalSchedule::new(secs(60), at(600), INFINITE_EXECUTIONS).unwrap();
        let decision = sched.next_fire(&Progress::default(), at(0));
        assert_eq!(
            decision,
            FireDecision::Fire {
                at: at(600),
                execution_number: 1
            }
        );
    }

    #[test]
    fn slot_exactly_at_now_fires_now() {
        let sched = IntervalSchedule::new(secs(60), at(0), INFINITE_EXECUTIONS).unwrap();
        let decision = sched.next_fire(&progress(2, Some(60)), at(120));
        assert_eq!(
            decision,
            FireDecision::Fire {
                at: at(120),
                execution_number: 3
            }
        );
    }

    #[test]
    fn rejects_non_positive_period() {
        assert_eq!(
            IntervalSchedule::new(0, at(0), 1).unwrap_err(),
            ScheduleError::NonPositivePeriod(0)
        );
        assert!(IntervalSchedule::new(-5, at(0), 1).is_err());
    }
}
