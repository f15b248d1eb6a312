//! Stream log abstraction.
//!
//! The engine talks to its backing log through [`StreamLog`]: append,
//! blocking group-read, idle-pending scan, claim, acknowledge, MINID trim,
//! and a small TTL'd key-value surface for trimmer coordination. Two
//! implementations ship with the crate:
//!
//! - [`redis::RedisLog`]: Redis Streams over a deadpool connection pool.
//! - [`memory::MemoryLog`]: a complete in-process log used by the
//!   test-suite and handy for local development.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryLog;
pub use redis::RedisLog;

/// A raw record: stream-assigned ID plus ordered field pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl RawRecord {
    /// First value stored under `name`, if any.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Records returned for one stream by a group read.
#[derive(Debug, Clone)]
pub struct StreamSlice {
    pub stream: String,
    pub records: Vec<RawRecord>,
}

/// One row of an idle-pending scan.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    /// Delivery count the log has recorded for this record.
    pub deliveries: u64,
}

/// One append of a pipelined batch.
#[derive(Debug, Clone)]
pub struct BatchAppend {
    pub stream: String,
    pub fields: Vec<(String, String)>,
}

/// Errors surfaced by a log implementation.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log connection error: {0}")]
    Connection(String),

    #[error("log command error: {0}")]
    Command(String),
}

/// Operations the messaging runtime requires of its backing log.
///
/// All operations are safe to retry; the engine wraps the critical ones
/// (ack, dead-letter append) in its retrier.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append a record with an auto-assigned ID; returns the ID.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, LogError>;

    /// Append a batch of records in one atomic pipeline.
    ///
    /// A wholesale pipeline failure is the outer `Err`; per-entry outcomes
    /// are the inner results, in submission order.
    async fn append_batch(
        &self,
        entries: &[BatchAppend],
    ) -> Result<Vec<Result<String, LogError>>, LogError>;

    /// Create `group` on `stream` at the genesis cursor, creating the
    /// stream when absent. An already-existing group is not an error.
    async fn group_create(&self, stream: &str, group: &str) -> Result<(), LogError>;

    /// Blocking read of new entries on behalf of `group`/`consumer`.
    ///
    /// Returns at most `count` records per stream; blocks up to `block`
    /// when nothing is available, then returns an empty result.
    async fn group_read(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamSlice>, LogError>;

    /// Scan `group`'s pending list for records idle at least `min_idle`.
    async fn pending_scan(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError>;

    /// Claim pending records for `consumer`, refreshing their idle time
    /// and incrementing their delivery count. Returns the current field
    /// values of each record actually claimed.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<RawRecord>, LogError>;

    /// Acknowledge one record for `group`. Acknowledging an unknown or
    /// already-acknowledged ID is a no-op.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), LogError>;

    /// Atomically append `entry` and acknowledge `(src_stream, group, id)`
    /// in one pipeline. This is the dead-letter rejection primitive.
    async fn append_and_ack(
        &self,
        entry: BatchAppend,
        src_stream: &str,
        group: &str,
        id: &str,
    ) -> Result<String, LogError>;

    /// Drop records with IDs below `min_id`; returns the removed count.
    async fn trim_min_id(&self, stream: &str, min_id: &str) -> Result<u64, LogError>;

    /// Set `key` to `value` with a TTL.
    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogError>;

    /// Read `key`, honouring TTL expiry.
    async fn kv_get(&self, key: &str) -> Result<Option<String>, LogError>;

    /// Number of records currently in `stream`.
    async fn len(&self, stream: &str) -> Result<u64, LogError>;

    /// First `count` records of `stream`, oldest first. Operational
    /// surface for inspecting the dead-letter stream.
    async fn range(&self, stream: &str, count: usize) -> Result<Vec<RawRecord>, LogError>;
}
