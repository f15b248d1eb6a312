//! Pending consumer: the idle-scan and claim loop.
//!
//! Per stream, per cycle: scan the group's pending list for records idle
//! at least the ack timeout, claim them for this consumer, and dispatch
//! the claimed batch. The attempt number dispatched is the delivery count
//! the scan observed, since the claim response itself does not carry it.
//!
//! A cycle that claims nothing doubles the backoff pause (capped at the
//! ack timeout); a productive cycle resets it to one second. Records whose
//! handlers are still inside their ack window are never touched because
//! the idle filter excludes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::decode_records;
use crate::backoff::Backoff;
use crate::channel::RegistrySnapshot;
use crate::config::SubscriberConfig;
use crate::log::{LogError, StreamLog};
use crate::processor::Processor;
use crate::shutdown::StopSignal;

const BACKOFF_MIN: Duration = Duration::from_secs(1);

pub(crate) struct PendingConsumer {
    log: Arc<dyn StreamLog>,
    group: String,
    consumer_name: String,
    streams: Vec<String>,
    fetch_batch_size: usize,
    ack_timeout: Duration,
    registry: Arc<RegistrySnapshot>,
    processor: Processor,
    stop: StopSignal,
}

impl PendingConsumer {
    pub(crate) fn new(
        log: Arc<dyn StreamLog>,
        config: &SubscriberConfig,
        consumer_name: String,
        registry: Arc<RegistrySnapshot>,
        processor: Processor,
        stop: StopSignal,
    ) -> Self {
        Self {
            log,
            group: config.group.clone(),
            consumer_name,
            streams: config.streams.clone(),
            fetch_batch_size: config.fetch_batch_size,
            ack_timeout: config.ack_timeout(),
            registry,
            processor,
            stop,
        }
    }

    pub(crate) async fn run(self) {
        info!(
            group = %self.group,
            consumer = %self.consumer_name,
            streams = ?self.streams,
            "pending consumer started"
        );
        let mut stop_rx = self.stop.subscribe();
        let mut backoff = Backoff::new(BACKOFF_MIN, self.ack_timeout);

        while !self.stop.is_triggered() {
            let mut claimed_any = false;

            for stream in &self.streams {
                if self.stop.is_triggered() {
                    break;
                }
                match self.reclaim_stream(stream).await {
                    Ok(claimed) => claimed_any |= claimed > 0,
                    Err(e) => {
                        error!(stream = %stream, group = %self.group, error = %e, "reclaim cycle failed");
                    }
                }
            }

            if claimed_any {
                backoff.reset();
            } else {
                backoff.increase();
            }

            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = backoff.wait() => {}
            }
        }

        info!(group = %self.group, consumer = %self.consumer_name, "pending consumer stopped");
    }

    /// One scan-claim-dispatch pass over `stream`; returns the claim count.
    async fn reclaim_stream(&self, stream: &str) -> Result<usize, LogError> {
        let pending = self
            .log
            .pending_scan(stream, &self.group, self.ack_timeout, self.fetch_batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = pending.iter().map(|entry| entry.id.clone()).collect();
        let attempts: HashMap<&str, u64> = pending
            .iter()
            .map(|entry| (entry.id.as_str(), entry.deliveries))
            .collect();

        let records = self
            .log
            .claim(
                stream,
                &self.group,
                &self.consumer_name,
                self.ack_timeout,
                &ids,
            )
            .await?;

        let mut events = decode_records(stream, records);
        for event in &mut events {
            // The claim reply omits the delivery count; carry over what the
            // scan reported.
            if let Some(attempt) = attempts.get(event.id.as_str()) {
                event.attempt = *attempt;
            }
        }

        let claimed = events.len();
        if claimed == 0 {
            return Ok(0);
        }

        debug!(stream = %stream, claimed, "reclaimed idle events");
        self.processor
            .process(stream, events, self.registry.actions(stream))
            .await;
        Ok(claimed)
    }
}
