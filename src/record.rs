//! Log record model: topics, keys, envelopes, and the partitioning function.
//!
//! Every record in the system is addressed by a `(domain, timer uuid)` pair
//! rendered as the UTF-8 key `"domain:uuid"`. The create/delete topic carries
//! serialized [`TimerDocument`]s; the progress/execute topic carries
//! [`ExecutionRecord`]s. An absent value is the deletion signal on both
//! topics - there is no separate delete message shape. A reserved marker key
//! tagged with a generation id is used by a node to detect that it has
//! caught up with a partition's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schedule::{Progress, ScheduleConfig};
use crate::task::TaskConfig;

/// Reserved key for the self-addressed fencing marker.
pub const MARKER_KEY: &[u8] = b"__sync_marker__";

/// Logical topics of the timer log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Create/delete records keyed by timer, plus the fencing marker.
    Timers,
    /// Progress/execute records keyed by timer.
    Executions,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Timers => "timers",
            Topic::Executions => "executions",
        }
    }
}

/// Errors decoding record keys or values.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("key is not valid UTF-8")]
    KeyNotUtf8,
    #[error("key has no ':' separator: {0:?}")]
    MissingSeparator(String),
    #[error("key has an empty domain")]
    EmptyDomain,
    #[error("key has an invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity of a timer: a tenant domain plus a uuid unique within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    pub domain: String,
    pub uuid: Uuid,
}

impl TimerKey {
    pub fn new(domain: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            domain: domain.into(),
            uuid,
        }
    }

    /// Wire encoding: `"domain:uuid"`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}", self.domain, self.uuid).into_bytes()
    }
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.domain, self.uuid)
    }
}

/// A decoded record key: either a timer address or the fencing marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Timer(TimerKey),
    Marker,
}

impl RecordKey {
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes == MARKER_KEY {
            return Ok(RecordKey::Marker);
        }
        let s = std::str::from_utf8(bytes).map_err(|_| RecordError::KeyNotUtf8)?;
        let (domain, uuid) = s
            .split_once(':')
            .ok_or_else(|| RecordError::MissingSeparator(s.to_string()))?;
        if domain.is_empty() {
            return Err(RecordError::EmptyDomain);
        }
        Ok(RecordKey::Timer(TimerKey {
            domain: domain.to_string(),
            uuid: Uuid::parse_str(uuid)?,
        }))
    }
}

/// Timer metadata recorded at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub creation_time: DateTime<Utc>,
}

/// The create-record value: everything needed to reconstruct a timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDocument {
    pub task: TaskConfig,
    pub schedule: ScheduleConfig,
    pub meta: Meta,
}

impl TimerDocument {
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The progress/execute-record value: progress after a fire plus the task's
/// opaque result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub progress: Progress,
    pub result: Vec<u8>,
}

impl ExecutionRecord {
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An outbound record handed to the log transport.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub topic: Topic,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub partition: u32,
    pub generation: u64,
}

impl ProducerRecord {
    /// Progress update produced after a fire. `value` is an encoded
    /// [`ExecutionRecord`].
    pub fn execution(key: &TimerKey, value: Vec<u8>, partition: u32, generation: u64) -> Self {
        Self {
            topic: Topic::Executions,
            key: key.encode(),
            value: Some(value),
            partition,
            generation,
        }
    }

    /// Tombstone on the create/delete topic.
    pub fn timer_tombstone(key: Vec<u8>, partition: u32, generation: u64) -> Self {
        Self {
            topic: Topic::Timers,
            key,
            value: None,
            partition,
            generation,
        }
    }

    /// Tombstone on the progress/execute topic.
    pub fn execution_tombstone(key: Vec<u8>, partition: u32, generation: u64) -> Self {
        Self {
            topic: Topic::Executions,
            key,
            value: None,
            partition,
            generation,
        }
    }

    /// Self-addressed fencing marker for a freshly assigned partition.
    pub fn marker(partition: u32, generation: u64) -> Self {
        Self {
            topic: Topic::Timers,
            key: MARKER_KEY.to_vec(),
            value: None,
            partition,
            generation,
        }
    }
}

/// An inbound record as delivered by the log transport, in partition order.
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub topic: Topic,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub partition: u32,
    /// Generation header, when the producing side attached one.
    pub generation: Option<u64>,
}

impl From<ProducerRecord> for ConsumerRecord {
    fn from(rec: ProducerRecord) -> Self {
        Self {
            topic: rec.topic,
            key: rec.key,
            value: rec.value,
            partition: rec.partition,
            generation: Some(rec.generation),
        }
    }
}

/// Maps a timer uuid to its partition by folding the uuid's bytes through a
/// rolling multiply-accumulate. Deterministic and stable across restarts;
/// the producing and consuming sides must agree on it.
pub fn partition_for(uuid: &Uuid, partition_count: u32) -> u32 {
    let mut partition: u32 = 0;
    for byte in uuid.as_bytes() {
        partition = (partition << 8) | u32::from(*byte);
        partition %= partition_count;
    }
    partition
}
