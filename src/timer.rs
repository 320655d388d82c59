//! The timer run-loop state machine.
//!
//! A [`Timer`] couples one schedule engine with one task executer and a
//! progress cursor, and owns a single cancellable run-loop task that
//! alternates between "sleep until next fire" and "execute once, record
//! progress". The loop terminates itself when the schedule is exhausted.
//!
//! `start` is idempotent; `stop` is synchronous - it does not return until
//! the run-loop has observed cancellation and exited, which is what lets a
//! manager guarantee no further fires before releasing partition ownership.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::publish::TimerSink;
use crate::record::{TimerDocument, TimerKey};
use crate::schedule::{FireDecision, Progress, Schedule, ScheduleError};
use crate::task::{Executer, TaskError, TaskLimits};

/// Construction-time validation failures.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("invalid task: {0}")]
    Task(#[from] TaskError),
}

struct RunHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One timer: identity, validated schedule and task, progress, and (while
/// running) the run-loop task.
pub struct Timer {
    key: TimerKey,
    schedule: Schedule,
    executer: Arc<Executer>,
    progress: Progress,
    sink: TimerSink,
    run: Option<RunHandle>,
}

impl Timer {
    /// Validates the document and builds a timer with zero progress.
    pub fn new(
        key: TimerKey,
        document: &TimerDocument,
        limits: &TaskLimits,
        sink: TimerSink,
    ) -> Result<Self, TimerError> {
        Self::with_progress(key, document, limits, sink, Progress::default())
    }

    /// Resume case: build from previously persisted progress.
    pub fn with_progress(
        key: TimerKey,
        document: &TimerDocument,
        limits: &TaskLimits,
        sink: TimerSink,
        progress: Progress,
    ) -> Result<Self, TimerError> {
        let schedule = Schedule::from_config(&document.schedule)?;
        let executer = Arc::new(Executer::new(&document.task, limits)?);
        Ok(Self {
            key,
            schedule,
            executer,
            progress,
            sink,
            run: None,
        })
    }

    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Replaces the progress cursor, keeping the larger slot count.
    /// Progress is monotone; the merge protects against a store snapshot
    /// that lags the log tail. Only meaningful before `start`.
    pub fn set_progress(&mut self, progress: Progress) {
        if self.run.is_some() {
            warn!(timer = %self.key, "ignoring progress update for a running timer");
            return;
        }
        if progress.completed_executions >= self.progress.completed_executions {
            self.progress = progress;
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Spawns the run-loop. A second call while running (or after the loop
    /// has terminated itself) is a no-op.
    pub fn start(&mut self) {
        if self.run.is_some() {
            return;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.key.clone(),
            self.schedule.clone(),
            Arc::clone(&self.executer),
            self.progress.clone(),
            self.sink.clone(),
            cancel_rx,
        ));
        self.run = Some(RunHandle {
            cancel: cancel_tx,
            handle,
        });
    }

    /// Cancels the run-loop and waits for it to exit. Guarantees that no
    /// fire is recorded after this returns. Idempotent; a no-op if the
    /// timer was never started.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let _ = run.cancel.send(true);
        if let Err(err) = run.handle.await {
            warn!(timer = %self.key, error = %err, "timer run-loop panicked");
        }
    }
}

/// Upper bound on one sleep; fires further out wake early, re-check, and
/// sleep again.
const MAX_SLEEP: std::time::Duration = std::time::Duration::from_secs(3600);

async fn run_loop(
    key: TimerKey,
    schedule: Schedule,
    executer: Arc<Executer>,
    mut progress: Progress,
    sink: TimerSink,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let (at, execution_number) = match schedule.next_fire(&progress, Utc::now()) {
            FireDecision::Done => {
                debug!(timer = %key, "schedule exhausted, retiring timer");
                sink.record_finish(&key);
                return;
            }
            FireDecision::Fire {
                at,
                execution_number,
            } => (at, execution_number),
        };

        let delay = (at - Utc::now()).to_std().unwrap_or_default().min(MAX_SLEEP);

        // Cancellation is checked first so a stop racing an already-due
        // fire always wins: either the previous iteration's fire was fully
        // recorded, or nothing is.
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                debug!(timer = %key, "run-loop cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {
                if Utc::now() < at {
                    // clamped sleep woke early, recompute
                    continue;
                }
                let result = executer.execute().await;
                progress.completed_executions = execution_number;
                progress.last_execution = Some(at);
                sink.record_execution(&key, progress.clone(), result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish;
    use crate::record::{ExecutionRecord, Meta, ProducerRecord, Topic};
    use crate::schedule::ScheduleConfig;
    use crate::task::{HttpMethod, HttpTaskConfig, TaskConfig};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration as StdDuration;

    const MS: i64 = 1_000_000;

    fn document(period_ms: i64, start: chrono::DateTime<Utc>, max: u32) -> TimerDocument {
        TimerDocument {
            task: TaskConfig::Http(HttpTaskConfig {
                // never connected in these tests; execution errors are
                // captured into the payload and the loop advances anyway
                url: "http://127.0.0.1:9/fire".to_string(),
                method: HttpMethod::Get,
                body: String::new(),
                headers: HashMap::new(),
                save_response_body: false,
            }),
            schedule: ScheduleConfig::Interval {
                period_ns: period_ms * MS,
                start,
                max_executions: max,
            },
            meta: Meta {
                creation_time: Utc::now(),
            },
        }
    }

    fn harness() -> (TimerKey, TimerSink, publish::PublisherRx) {
        let (publisher, rx) = publish::channel();
        let key = TimerKey::new("acme", uuid::Uuid::new_v4());
        let sink = TimerSink::new(publisher, 0, Arc::new(AtomicU64::new(3)));
        (key, sink, rx)
    }

    async fn next_record(rx: &mut publish::PublisherRx) -> ProducerRecord {
        tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a record")
            .expect("publisher closed")
    }

    #[tokio::test]
    async fn overdue_timer_fires_immediately_and_compensates() {
        let (key, sink, mut rx) = harness();
        // two slots already missed, bound of two executions
        let start = Utc::now() - chrono::Duration::milliseconds(150);
        let mut timer =
            Timer::new(key.clone(), &document(60, start, 2), &TaskLimits::default(), sink).unwrap();
        timer.start();

        let record = next_record(&mut rx).await;
        assert_eq!(record.topic, Topic::Executions);
        assert_eq!(record.generation, 3);
        let execution = ExecutionRecord::decode(record.value.as_deref().unwrap()).unwrap();
        assert_eq!(execution.progress.completed_executions, 2);
        assert!(execution.progress.last_execution.is_some());

        // exhausted: tombstones on both topics, in order
        let finish = next_record(&mut rx).await;
        assert_eq!(finish.topic, Topic::Timers);
        assert!(finish.value.is_none());
        let retired = next_record(&mut rx).await;
        assert_eq!(retired.topic, Topic::Executions);
        assert!(retired.value.is_none());

        timer.stop().await;
    }

    #[tokio::test]
    async fn fires_on_schedule_until_exhausted() {
        let (key, sink, mut rx) = harness();
        let mut timer = Timer::new(
            key.clone(),
            &document(20, Utc::now(), 3),
            &TaskLimits::default(),
            sink,
        )
        .unwrap();
        timer.start();

        // a slow test runner may collapse fires into a compensating one, so
        // assert the cursor is strictly increasing up to the bound rather
        // than an exact fire count
        let mut cursor = 0;
        loop {
            let record = next_record(&mut rx).await;
            let Some(value) = record.value.as_deref() else {
                break; // retirement tombstone
            };
            assert_eq!(record.topic, Topic::Executions);
            let execution = ExecutionRecord::decode(value).unwrap();
            assert!(execution.progress.completed_executions > cursor);
            cursor = execution.progress.completed_executions;
        }
        assert_eq!(cursor, 3);
        timer.stop().await;
    }

    #[tokio::test]
    async fn stop_before_the_first_fire_produces_nothing() {
        let (key, sink, mut rx) = harness();
        let start = Utc::now() + chrono::Duration::seconds(30);
        let mut timer =
            Timer::new(key, &document(1_000, start, 0), &TaskLimits::default(), sink).unwrap();
        timer.start();
        timer.stop().await;

        // channel drained and closed without a single record
        drop(timer);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let (key, sink, mut rx) = harness();
        let start = Utc::now() - chrono::Duration::milliseconds(10);
        let mut timer =
            Timer::new(key, &document(50_000, start, 1), &TaskLimits::default(), sink).unwrap();
        timer.start();
        timer.start();

        // one fire, one finish pair; a duplicated loop would double these
        let record = next_record(&mut rx).await;
        assert_eq!(record.topic, Topic::Executions);
        assert!(record.value.is_some());
        assert!(next_record(&mut rx).await.value.is_none());
        assert!(next_record(&mut rx).await.value.is_none());
        timer.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resumed_progress_suppresses_already_consumed_slots() {
        let (key, sink, mut rx) = harness();
        let start = Utc::now() - chrono::Duration::milliseconds(100);
        let progress = Progress {
            completed_executions: 2,
            last_execution: Some(start),
        };
        let mut timer = Timer::with_progress(
            key,
            &document(60, start, 2),
            &TaskLimits::default(),
            sink,
            progress,
        )
        .unwrap();
        timer.start();

        // already exhausted: no execution record, straight to retirement
        let record = next_record(&mut rx).await;
        assert_eq!(record.topic, Topic::Timers);
        assert!(record.value.is_none());
        timer.stop().await;
    }

    #[test]
    fn construction_rejects_invalid_configuration() {
        let (key, sink, _rx) = {
            let (publisher, rx) = publish::channel();
            (
                TimerKey::new("acme", uuid::Uuid::new_v4()),
                TimerSink::new(publisher, 0, Arc::new(AtomicU64::new(0))),
                rx,
            )
        };
        let mut doc = document(10, Utc::now(), 1);
        doc.schedule = ScheduleConfig::Interval {
            period_ns: 0,
            start: Utc::now(),
            max_executions: 1,
        };
        assert!(matches!(
            Timer::new(key, &doc, &TaskLimits::default(), sink),
            Err(TimerError::Schedule(_))
        ));
    }
}
