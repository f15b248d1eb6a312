//! In-process implementation of [`StreamLog`].
//!
//! A complete log — streams, consumer groups, pending lists with idle and
//! delivery bookkeeping, MINID trimming and a TTL'd key-value table — held
//! behind one mutex. The test-suite runs the whole engine against it, and
//! it is convenient for local development when no server is around.
//!
//! Idle times and TTLs are measured with `tokio::time::Instant`, so tests
//! running under a paused runtime clock see them advance deterministically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{BatchAppend, LogError, PendingEntry, RawRecord, StreamLog, StreamSlice};

type StreamId = (u64, u64);

fn parse_id(id: &str) -> Option<StreamId> {
    let (ms, seq) = id.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

fn format_id(id: StreamId) -> String {
    format!("{}-{}", id.0, id.1)
}

struct PendingState {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Default)]
struct GroupState {
    last_delivered: StreamId,
    pending: HashMap<String, PendingState>,
}

#[derive(Default)]
struct StreamState {
    records: Vec<RawRecord>,
    last_id: StreamId,
    groups: HashMap<String, GroupState>,
}

struct KvEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    kv: HashMap<String, KvEntry>,
}

/// In-memory [`StreamLog`].
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<State>,
    appended: Notify,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record with an explicit ID. Test/seed helper; the ID must
    /// exceed the stream's current maximum, as with an explicit-ID XADD.
    pub fn append_at(
        &self,
        stream: &str,
        id: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, LogError> {
        let parsed = parse_id(id)
            .ok_or_else(|| LogError::Command(format!("invalid stream ID '{id}'")))?;

        {
            let mut state = self.state.lock().unwrap();
            let stream_state = state.streams.entry(stream.to_string()).or_default();
            if parsed <= stream_state.last_id && !stream_state.records.is_empty() {
                return Err(LogError::Command(
                    "the ID specified is equal or smaller than the target stream top item"
                        .to_string(),
                ));
            }
            stream_state.last_id = parsed;
            stream_state.records.push(RawRecord {
                id: id.to_string(),
                fields,
            });
        }

        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    fn push_record(state: &mut State, stream: &str, fields: Vec<(String, String)>) -> String {
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now_ms > stream_state.last_id.0 {
            (now_ms, 0)
        } else {
            (stream_state.last_id.0, stream_state.last_id.1 + 1)
        };
        stream_state.last_id = id;

        let id = format_id(id);
        stream_state.records.push(RawRecord {
            id: id.clone(),
            fields,
        });
        id
    }
}

#[async_trait]
impl StreamLog for MemoryLog {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, LogError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            Self::push_record(&mut state, stream, fields.to_vec())
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn append_batch(
        &self,
        entries: &[BatchAppend],
    ) -> Result<Vec<Result<String, LogError>>, LogError> {
        let ids = {
            let mut state = self.state.lock().unwrap();
            entries
                .iter()
                .map(|entry| Ok(Self::push_record(&mut state, &entry.stream, entry.fields.clone())))
                .collect()
        };
        self.appended.notify_waiters();
        Ok(ids)
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        stream_state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn group_read(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamSlice>, LogError> {
        let deadline = Instant::now() + block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let mut slices = Vec::new();

                for stream in streams {
                    let stream_state = state.streams.get_mut(stream).ok_or_else(|| {
                        LogError::Command(format!(
                            "NOGROUP no consumer group '{group}' for stream '{stream}'"
                        ))
                    })?;
                    let StreamState {
                        records, groups, ..
                    } = stream_state;
                    let group_state = groups.get_mut(group).ok_or_else(|| {
                        LogError::Command(format!(
                            "NOGROUP no consumer group '{group}' for stream '{stream}'"
                        ))
                    })?;

                    let mut taken = Vec::new();
                    for record in records.iter() {
                        if taken.len() >= count {
                            break;
                        }
                        let Some(id) = parse_id(&record.id) else {
                            continue;
                        };
                        if id <= group_state.last_delivered {
                            continue;
                        }
                        group_state.last_delivered = id;
                        group_state.pending.insert(
                            record.id.clone(),
                            PendingState {
                                consumer: consumer.to_string(),
                                delivered_at: now,
                                deliveries: 1,
                            },
                        );
                        taken.push(record.clone());
                    }

                    if !taken.is_empty() {
                        slices.push(StreamSlice {
                            stream: stream.clone(),
                            records: taken,
                        });
                    }
                }

                if !slices.is_empty() {
                    return Ok(slices);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn pending_scan(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError> {
        let state = self.state.lock().unwrap();
        let now = Instant::now();

        let Some(group_state) = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
        else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<PendingEntry> = group_state
            .pending
            .iter()
            .filter_map(|(id, pending)| {
                let idle = now.saturating_duration_since(pending.delivered_at);
                (idle >= min_idle).then(|| PendingEntry {
                    id: id.clone(),
                    consumer: pending.consumer.clone(),
                    idle,
                    deliveries: pending.deliveries,
                })
            })
            .collect();

        entries.sort_by_key(|entry| parse_id(&entry.id));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<RawRecord>, LogError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let Some(stream_state) = state.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let StreamState {
            records, groups, ..
        } = stream_state;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for id in ids {
            let Some(pending) = group_state.pending.get_mut(id) else {
                continue;
            };
            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }

            match records.iter().find(|record| &record.id == id) {
                Some(record) => {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    pending.deliveries += 1;
                    claimed.push(record.clone());
                }
                None => {
                    // Record was trimmed out from under the pending list;
                    // the claim deletes the dangling entry, as Redis does.
                    group_state.pending.remove(id);
                }
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        if let Some(group_state) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(id);
        }
        Ok(())
    }

    async fn append_and_ack(
        &self,
        entry: BatchAppend,
        src_stream: &str,
        group: &str,
        id: &str,
    ) -> Result<String, LogError> {
        let new_id = {
            let mut state = self.state.lock().unwrap();
            let new_id = Self::push_record(&mut state, &entry.stream, entry.fields);
            if let Some(group_state) = state
                .streams
                .get_mut(src_stream)
                .and_then(|s| s.groups.get_mut(group))
            {
                group_state.pending.remove(id);
            }
            new_id
        };
        self.appended.notify_waiters();
        Ok(new_id)
    }

    async fn trim_min_id(&self, stream: &str, min_id: &str) -> Result<u64, LogError> {
        let min = parse_id(min_id)
            .ok_or_else(|| LogError::Command(format!("invalid stream ID '{min_id}'")))?;

        let mut state = self.state.lock().unwrap();
        let Some(stream_state) = state.streams.get_mut(stream) else {
            return Ok(0);
        };

        let before = stream_state.records.len();
        stream_state
            .records
            .retain(|record| parse_id(&record.id).is_none_or(|id| id >= min));
        Ok((before - stream_state.records.len()) as u64)
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        state.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, LogError> {
        let mut state = self.state.lock().unwrap();
        match state.kv.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.records.len() as u64)
            .unwrap_or(0))
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<RawRecord>, LogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.records.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }
}
