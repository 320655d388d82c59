//! Belltower - a partitioned recurring-timer execution engine.
//!
//! Timers (cron or fixed-interval schedules attached to a task, currently
//! a bounded HTTP request) are sharded across log partitions. Each node
//! runs one [`consumer::PartitionConsumer`] that replays its partitions'
//! create/delete/progress records, hands them to per-partition
//! [`manager::Manager`]s, and - once a generation-fenced marker proves the
//! node has caught up - activates the timers' run-loops. Progress
//! bookkeeping survives crashes and rebalances without double-firing or
//! silently dropping fires; the task side effect itself is at-least-once.

pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod manager;
pub mod observability;
pub mod publish;
pub mod record;
pub mod schedule;
pub mod store;
pub mod task;
pub mod timer;

pub use config::Config;
pub use consumer::{LogEvent, PartitionConsumer};
pub use coordinator::{Coordinator, PartitionAssignment};
pub use manager::{Manager, ManagerState};
pub use publish::{Publisher, PublisherRx, TimerSink};
pub use record::{
    ConsumerRecord, ExecutionRecord, Meta, ProducerRecord, RecordKey, TimerDocument, TimerKey,
    Topic, partition_for,
};
pub use schedule::{
    FireDecision, INFINITE_EXECUTIONS, Progress, Schedule, ScheduleConfig, ScheduleError,
};
pub use store::{InMemoryProgressStore, ProgressStore};
pub use task::{Executer, HttpMethod, HttpTaskConfig, TaskConfig, TaskError, TaskLimits};
pub use timer::{Timer, TimerError};
