//! Live consumer: the blocking group-read loop.
//!
//! Each iteration issues one group read over every configured stream with
//! the new-entries cursor, so records seen here are always first
//! deliveries (`attempt = 0`). Non-empty slices are decoded and processed
//! concurrently; read errors are logged and the loop continues, the
//! server-side block already pacing it. The pending list is never touched
//! from this loop.

use std::sync::Arc;

use futures_util::future;
use tracing::{error, info};

use super::decode_records;
use crate::channel::RegistrySnapshot;
use crate::config::SubscriberConfig;
use crate::log::StreamLog;
use crate::processor::Processor;
use crate::shutdown::StopSignal;

pub(crate) struct LiveConsumer {
    log: Arc<dyn StreamLog>,
    group: String,
    consumer_name: String,
    streams: Vec<String>,
    fetch_batch_size: usize,
    block_time: std::time::Duration,
    registry: Arc<RegistrySnapshot>,
    processor: Processor,
    stop: StopSignal,
}

impl LiveConsumer {
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
            block_time: config.block_time(),
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
            "live consumer started"
        );
        let mut stop_rx = self.stop.subscribe();

        loop {
            if self.stop.is_triggered() {
                break;
            }

            let read = tokio::select! {
                _ = stop_rx.recv() => break,
                read = self.log.group_read(
                    &self.group,
                    &self.consumer_name,
                    &self.streams,
                    self.fetch_batch_size,
                    self.block_time,
                ) => read,
            };

            let slices = match read {
                Ok(slices) => slices,
                Err(e) => {
                    error!(group = %self.group, error = %e, "group read failed");
                    continue;
                }
            };

            let batches: Vec<_> = slices
                .into_iter()
                .map(|slice| {
                    let events = decode_records(&slice.stream, slice.records);
                    (slice.stream, events)
                })
                .collect();

            let processor = &self.processor;
            let registry = &self.registry;
            future::join_all(batches.into_iter().map(|(stream, events)| async move {
                processor
                    .process(&stream, events, registry.actions(&stream))
                    .await;
            }))
            .await;
        }

        info!(group = %self.group, consumer = %self.consumer_name, "live consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckHandle;
    use crate::channel::ChannelRegistry;
    use crate::event::{Event, Headers};
    use crate::handler::{ActionFn, HandlerError};
    use crate::hooks::HookBus;
    use crate::log::MemoryLog;
    use crate::codec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn reads_dispatch_and_stop_cleanly() {
        let log = Arc::new(MemoryLog::new());
        log.group_create("users", "g").await.unwrap();

        let handled = Arc::new(AtomicUsize::new(0));
        let mut registry = ChannelRegistry::new();
        registry.channel("users").action("u_created", {
            let handled = handled.clone();
            ActionFn::arc(move |event: Event, ack: AckHandle| {
                let handled = handled.clone();
                async move {
                    assert_eq!(event.attempt, 0);
                    handled.fetch_add(1, Ordering::SeqCst);
                    ack.ack()
                        .await
                        .map_err(|e| HandlerError::failed(e.to_string()))
                }
            })
        });

        let mut config = SubscriberConfig::new("g", vec!["users".to_string()]);
        config.block_time_ms = 1_000;
        let config = config.clamped();

        let stop = StopSignal::new();
        let snapshot = Arc::new(registry.snapshot());
        let processor = Processor::new(log.clone(), &config, HookBus::new());
        let consumer = LiveConsumer::new(
            log.clone(),
            &config,
            "c-1".to_string(),
            snapshot,
            processor,
            stop.clone(),
        );
        let task = tokio::spawn(consumer.run());

        let fields = codec::encode("u_created", &json!({"id": "1"}), &Headers::default(), "pub");
        log.append("users", &fields).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert!(log
            .pending_scan("users", "g", Duration::ZERO, 10)
            .await
            .unwrap()
            .is_empty());

        stop.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("consumer should stop")
            .unwrap();
    }
}
