//! Distributed retention trimmer.
//!
//! Each cycle drops records older than the retention period from every
//! configured stream, one `XTRIM MINID` per stream, all streams
//! concurrently. Coordination across instances is advisory: a TTL'd
//! key-value record at `rivulex:trimmer:<stream>` marks a recent trim, and
//! any instance that sees the key skips the stream until the TTL lapses.
//!
//! Scheduling is jittered twice over so a fleet of instances does not
//! phase-lock: a uniform start-up delay in [1 s, 10 s], and a per-cycle
//! interval of `interval ± 30 s`, re-sampled every cycle. Per-stream
//! failures are isolated and never retried within the cycle; the next
//! cycle covers them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::TrimmerConfig;
use crate::log::StreamLog;
use crate::shutdown::StopSignal;

const COORD_KEY_PREFIX: &str = "rivulex:trimmer:";
const START_DELAY_MS: std::ops::RangeInclusive<u64> = 1_000..=10_000;
const INTERVAL_JITTER_MS: i64 = 30_000;

/// Coordination record left behind by a successful trim.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRecord {
    pub client_id: String,
    pub trimmed_at: String,
    pub interval_time: u64,
    pub retention_period: u64,
    pub min_id: String,
    pub group: String,
}

pub(crate) struct Trimmer {
    log: Arc<dyn StreamLog>,
    group: String,
    client_id: String,
    streams: Vec<String>,
    interval: Duration,
    retention: Duration,
    stop: StopSignal,
}

impl Trimmer {
    pub(crate) fn new(
        log: Arc<dyn StreamLog>,
        group: String,
        streams: Vec<String>,
        config: &TrimmerConfig,
        stop: StopSignal,
    ) -> Self {
        let client_id = format!("rivulex:{}:trimmer:{}", group, Utc::now().timestamp_millis());
        Self {
            log,
            group,
            client_id,
            streams,
            interval: config.interval(),
            retention: config.retention(),
            stop,
        }
    }

    pub(crate) async fn run(self) {
        let start_delay = Duration::from_millis(rand::rng().random_range(START_DELAY_MS));
        info!(
            client_id = %self.client_id,
            streams = ?self.streams,
            start_delay_ms = start_delay.as_millis() as u64,
            "trimmer started"
        );

        let mut stop_rx = self.stop.subscribe();
        tokio::select! {
            _ = stop_rx.recv() => return,
            _ = tokio::time::sleep(start_delay) => {}
        }

        loop {
            self.run_cycle().await;

            let pause = self.jittered_interval();
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(client_id = %self.client_id, "trimmer stopped");
    }

    /// Trim every configured stream once, concurrently.
    async fn run_cycle(&self) {
        future::join_all(self.streams.iter().map(|stream| self.trim_stream(stream))).await;
    }

    async fn trim_stream(&self, stream: &str) {
        let key = format!("{COORD_KEY_PREFIX}{stream}");

        match self.log.kv_get(&key).await {
            Ok(Some(_)) => {
                debug!(stream = %stream, "recent trim on record, skipping");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(stream = %stream, error = %e, "trim coordination read failed");
                return;
            }
        }

        let cutoff = Utc::now().timestamp_millis() - self.retention.as_millis() as i64;
        let min_id = format!("{}-0", cutoff.max(0));

        match self.log.trim_min_id(stream, &min_id).await {
            Ok(removed) => {
                info!(stream = %stream, removed, min_id = %min_id, "stream trimmed");
            }
            Err(e) => {
                error!(stream = %stream, error = %e, "trim failed");
                return;
            }
        }

        let record = TrimRecord {
            client_id: self.client_id.clone(),
            trimmed_at: Utc::now().to_rfc3339(),
            interval_time: self.interval.as_millis() as u64,
            retention_period: self.retention.as_millis() as u64,
            min_id,
            group: self.group.clone(),
        };
        let value = match serde_json::to_string(&record) {
            Ok(value) => value,
            Err(e) => {
                error!(stream = %stream, error = %e, "trim record serialization failed");
                return;
            }
        };

        let ttl = Duration::from_secs(self.interval.as_secs().max(1));
        if let Err(e) = self.log.kv_set(&key, &value, ttl).await {
            error!(stream = %stream, error = %e, "trim coordination write failed");
        }
    }

    /// `interval ± 30 s`, floored at one second since the minimum interval
    /// sits below the jitter band.
    fn jittered_interval(&self) -> Duration {
        let offset = rand::rng().random_range(-INTERVAL_JITTER_MS..=INTERVAL_JITTER_MS);
        let base = self.interval.as_millis() as i64;
        Duration::from_millis((base + offset).max(1_000) as u64)
    }
}
