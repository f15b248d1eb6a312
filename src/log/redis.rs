//! Redis Streams implementation of [`StreamLog`].
//!
//! Commands are issued over a deadpool connection pool; a connection is
//! checked out per operation, so the blocking group-read never starves
//! non-blocking commands issued elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{cmd, AsyncCommands, Cmd, Value as RedisValue};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use super::{BatchAppend, LogError, PendingEntry, RawRecord, StreamLog, StreamSlice};

/// [`StreamLog`] backed by Redis Streams.
#[derive(Clone)]
pub struct RedisLog {
    pool: Pool,
}

impl RedisLog {
    /// Wrap an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a `redis://` URL.
    pub fn from_url(url: &str) -> Result<Self, LogError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| LogError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, LogError> {
        self.pool
            .get()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))
    }
}

fn command_error(e: impl std::fmt::Display) -> LogError {
    LogError::Command(e.to_string())
}

/// True for the errors the client raises when a blocking read returns
/// nothing before its BLOCK deadline.
fn is_empty_read(message: &str) -> bool {
    message.contains("timed out") || message.contains("response was nil")
}

fn xadd_command(stream: &str, fields: &[(String, String)]) -> Cmd {
    let mut c = cmd("XADD");
    c.arg(stream).arg("*");
    for (key, value) in fields {
        c.arg(key).arg(value);
    }
    c
}

fn value_to_string(value: &RedisValue) -> String {
    match value {
        RedisValue::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
        RedisValue::SimpleString(s) => s.clone(),
        RedisValue::Int(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

fn record_from_stream_id(id: deadpool_redis::redis::streams::StreamId) -> RawRecord {
    RawRecord {
        id: id.id,
        fields: id
            .map
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect(),
    }
}

#[async_trait]
impl StreamLog for RedisLog {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, LogError> {
        let mut conn = self.conn().await?;
        xadd_command(stream, fields)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn append_batch(
        &self,
        entries: &[BatchAppend],
    ) -> Result<Vec<Result<String, LogError>>, LogError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic();
        for entry in entries {
            pipe.add_command(xadd_command(&entry.stream, &entry.fields));
        }

        let ids: Vec<String> = pipe.query_async(&mut conn).await.map_err(command_error)?;
        Ok(ids.into_iter().map(Ok).collect())
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<(), LogError> {
        let mut conn = self.conn().await?;
        let result: Result<(), _> = cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error(e)),
        }
    }

    async fn group_read(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamSlice>, LogError> {
        let mut conn = self.conn().await?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let keys: Vec<&str> = streams.iter().map(String::as_str).collect();
        let cursors = vec![">"; keys.len()];

        let reply: StreamReadReply = match conn.xread_options(&keys, &cursors, &opts).await {
            Ok(reply) => reply,
            Err(e) if is_empty_read(&e.to_string()) => return Ok(Vec::new()),
            Err(e) => return Err(command_error(e)),
        };

        Ok(reply
            .keys
            .into_iter()
            .map(|key| StreamSlice {
                stream: key.key,
                records: key.ids.into_iter().map(record_from_stream_id).collect(),
            })
            .collect())
    }

    async fn pending_scan(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let reply: StreamPendingCountReply = cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| PendingEntry {
                id: entry.id,
                consumer: entry.consumer,
                idle: Duration::from_millis(entry.last_delivered_ms as u64),
                deliveries: entry.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<RawRecord>, LogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let mut c = cmd("XCLAIM");
        c.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for id in ids {
            c.arg(id);
        }

        let reply: StreamClaimReply = c.query_async(&mut conn).await.map_err(command_error)?;
        Ok(reply.ids.into_iter().map(record_from_stream_id).collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), LogError> {
        let mut conn = self.conn().await?;
        let _acked: u64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn append_and_ack(
        &self,
        entry: BatchAppend,
        src_stream: &str,
        group: &str,
        id: &str,
    ) -> Result<String, LogError> {
        let mut conn = self.conn().await?;
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic();
        pipe.add_command(xadd_command(&entry.stream, &entry.fields));
        pipe.cmd("XACK").arg(src_stream).arg(group).arg(id);

        let (new_id, _acked): (String, u64) =
            pipe.query_async(&mut conn).await.map_err(command_error)?;
        Ok(new_id)
    }

    async fn trim_min_id(&self, stream: &str, min_id: &str) -> Result<u64, LogError> {
        let mut conn = self.conn().await?;
        cmd("XTRIM")
            .arg(stream)
            .arg("MINID")
            .arg(min_id)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogError> {
        let mut conn = self.conn().await?;
        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, LogError> {
        let mut conn = self.conn().await?;
        cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        let mut conn = self.conn().await?;
        cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<RawRecord>, LogError> {
        let mut conn = self.conn().await?;
        let entries: Vec<(String, Vec<(String, String)>)> = cmd("XRANGE")
            .arg(stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(entries
            .into_iter()
            .map(|(id, fields)| RawRecord { id, fields })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversion_covers_string_shapes() {
        assert_eq!(
            value_to_string(&RedisValue::BulkString(b"abc".to_vec())),
            "abc"
        );
        assert_eq!(
            value_to_string(&RedisValue::SimpleString("ok".to_string())),
            "ok"
        );
        assert_eq!(value_to_string(&RedisValue::Int(7)), "7");
    }

    #[test]
    fn empty_read_errors_are_recognised() {
        assert!(is_empty_read("Response was of incompatible type - response was nil"));
        assert!(is_empty_read("timed out"));
        assert!(!is_empty_read("NOGROUP no such group"));
    }

    #[test]
    fn xadd_command_preserves_field_order() {
        let c = xadd_command(
            "users",
            &[
                ("action".to_string(), "a".to_string()),
                ("payload".to_string(), "{}".to_string()),
            ],
        );
        let packed = c.get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        let action = text.find("action").unwrap();
        let payload = text.find("payload").unwrap();
        assert!(action < payload);
    }
}
