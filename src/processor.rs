//! Event processor.
//!
//! [`Processor::process`] drives a decoded batch to terminal states:
//! confirmed, skipped, rejected, or left pending for reclaim. It owns the
//! per-consumer concurrency bound, the per-handler timeout, and the
//! dead-letter rejection pipeline. It never surfaces an error to the
//! consumer loop that called it.
//!
//! Per-event decision order:
//!
//! 1. rejected by another group — acknowledge without dispatch, so
//!    dead-letter consumers do not replay other groups' failures;
//! 2. no handler for the action — acknowledge;
//! 3. attempt budget exhausted — reject to the dead-letter;
//! 4. otherwise dispatch, racing the handler against the process timeout.
//!
//! A timed-out handler is not cancelled: it keeps running as a background
//! task and its eventual ack still confirms the event, provided it lands
//! before the ack timeout lets the pending consumer reclaim the record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::ack::AckHandle;
use crate::channel::ActionMap;
use crate::codec;
use crate::config::SubscriberConfig;
use crate::event::Event;
use crate::hooks::{FailedHook, HookBus};
use crate::log::{BatchAppend, StreamLog};
use crate::retry::Retrier;

pub(crate) struct Processor {
    log: Arc<dyn StreamLog>,
    group: String,
    dead_letter: String,
    retries: u64,
    process_timeout: Duration,
    hooks: HookBus,
    retrier: Retrier,
    slots: Arc<Semaphore>,
}

impl Processor {
    /// Each consumer loop builds its own processor, so the engine-wide
    /// in-flight bound is twice the configured concurrency.
    pub(crate) fn new(log: Arc<dyn StreamLog>, config: &SubscriberConfig, hooks: HookBus) -> Self {
        Self {
            log,
            group: config.group.clone(),
            dead_letter: config.dead_letter.clone(),
            retries: config.retries,
            process_timeout: config.process_timeout(),
            hooks,
            retrier: Retrier::default(),
            slots: Arc::new(Semaphore::new(config.process_concurrency)),
        }
    }

    /// Drive every event of the batch to a terminal state for this cycle.
    pub(crate) async fn process(&self, stream: &str, events: Vec<Event>, actions: &ActionMap) {
        debug!(stream = %stream, batch = events.len(), "processing batch");

        futures_util::stream::iter(events)
            .for_each_concurrent(None, |event| async move {
                // Closed only on drop, so the permit is always granted.
                let Ok(_permit) = self.slots.acquire().await else {
                    return;
                };
                self.dispatch(event, actions).await;
            })
            .await;
    }

    async fn dispatch(&self, event: Event, actions: &ActionMap) {
        if event.headers.rejected_by_other(&self.group) {
            debug!(
                id = %event.id,
                stream = %event.stream,
                rejected_group = event.headers.rejected_group.as_deref().unwrap_or(""),
                "skipping record rejected by another group"
            );
            self.ack_quietly(&event).await;
            return;
        }

        let Some(handler) = actions.get(&event.action).cloned() else {
            debug!(
                id = %event.id,
                stream = %event.stream,
                action = %event.action,
                "no handler registered, acknowledging"
            );
            self.ack_quietly(&event).await;
            return;
        };

        if event.attempt >= self.retries {
            self.reject(&event).await;
            return;
        }

        let acked = Arc::new(AtomicBool::new(false));
        let ack = AckHandle::new(
            self.log.clone(),
            self.group.clone(),
            event.clone(),
            self.retrier,
            self.hooks.clone(),
            acked.clone(),
        );

        let task = tokio::spawn({
            let event = event.clone();
            async move { handler.handle(event, ack).await }
        });

        match timeout(self.process_timeout, task).await {
            Ok(Ok(Ok(()))) => {
                if !acked.load(Ordering::SeqCst) {
                    debug!(
                        id = %event.id,
                        stream = %event.stream,
                        "handler returned without confirming, left for reclaim"
                    );
                }
            }
            Ok(Ok(Err(e))) => self.handler_failed(&event, e.to_string()).await,
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                };
                self.handler_failed(&event, reason).await;
            }
            Err(_) => {
                // Dropping the join handle detaches the task; the handler
                // keeps running and its late ack still counts.
                warn!(
                    id = %event.id,
                    stream = %event.stream,
                    timeout_ms = self.process_timeout.as_millis() as u64,
                    "handler exceeded its processing budget"
                );
                self.hooks.emit_timeout(&event);
            }
        }
    }

    async fn handler_failed(&self, event: &Event, error: String) {
        error!(
            id = %event.id,
            stream = %event.stream,
            attempt = event.attempt,
            error = %error,
            "handler failed"
        );
        self.hooks.emit_failed(&FailedHook::Delivery {
            event: event.clone(),
            error,
        });

        if event.attempt + 1 >= self.retries {
            self.reject(event).await;
        }
    }

    /// Append the event to the dead-letter stream and acknowledge it at the
    /// source in one atomic pipeline. On failure the event simply stays
    /// pending and a later reclaim tries again.
    async fn reject(&self, event: &Event) {
        let mut headers = event.headers.clone();
        headers.rejected = Some(true);
        headers.rejected_group = Some(self.group.clone());
        headers.rejected_timestamp = Some(Utc::now().to_rfc3339());

        let entry = BatchAppend {
            stream: self.dead_letter.clone(),
            fields: codec::reencode(&event.action, &event.payload, &headers),
        };

        let result = self
            .retrier
            .run(|| {
                self.log
                    .append_and_ack(entry.clone(), &event.stream, &self.group, &event.id)
            })
            .await;

        match result {
            Ok(dead_letter_id) => {
                warn!(
                    id = %event.id,
                    stream = %event.stream,
                    dead_letter_id = %dead_letter_id,
                    attempt = event.attempt,
                    "event rejected to dead-letter"
                );
                self.hooks.emit_rejected(event);
            }
            Err(e) => error!(
                id = %event.id,
                stream = %event.stream,
                error = %e,
                "dead-letter rejection failed, event left for reclaim"
            ),
        }
    }

    async fn ack_quietly(&self, event: &Event) {
        let result = self
            .retrier
            .run(|| self.log.ack(&event.stream, &self.group, &event.id))
            .await;
        if let Err(e) = result {
            error!(id = %event.id, stream = %event.stream, error = %e, "acknowledgement failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;
    use crate::event::Headers;
    use crate::handler::{ActionFn, HandlerError};
    use crate::log::MemoryLog;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn config(retries: u64, concurrency: usize) -> SubscriberConfig {
        let mut config = SubscriberConfig::new("g", vec!["s".to_string()]);
        config.retries = retries;
        config.process_concurrency = concurrency;
        config
    }

    async fn seed_event(log: &Arc<MemoryLog>, action: &str, headers: &Headers) -> Event {
        log.group_create("s", "g").await.unwrap();
        let fields = codec::encode(action, &json!({"k": 1}), headers, "pub");
        log.append("s", &fields).await.unwrap();
        let slices = log
            .group_read("g", "c", &["s".to_string()], 10, Duration::from_millis(1))
            .await
            .unwrap();
        codec::decode("s", slices[0].records.last().unwrap()).unwrap()
    }

    async fn pending_len(log: &Arc<MemoryLog>) -> usize {
        log.pending_scan("s", "g", Duration::ZERO, 100)
            .await
            .unwrap()
            .len()
    }

    fn counting_actions(calls: Arc<AtomicUsize>, action: &str) -> ActionMap {
        let mut registry = ChannelRegistry::new();
        registry.channel("s").action(
            action,
            ActionFn::arc(move |_event: Event, ack: AckHandle| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ack.ack()
                        .await
                        .map_err(|e| HandlerError::failed(e.to_string()))
                }
            }),
        );
        registry.snapshot().actions("s").clone()
    }

    #[tokio::test]
    async fn unknown_action_is_acknowledged_without_dispatch() {
        let log = Arc::new(MemoryLog::new());
        let event = seed_event(&log, "unhandled", &Headers::default()).await;

        let processor = Processor::new(log.clone(), &config(3, 10), HookBus::new());
        processor.process("s", vec![event], &ActionMap::new()).await;

        assert_eq!(pending_len(&log).await, 0);
        assert_eq!(log.len("dead_letter").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn foreign_rejects_are_skipped() {
        let log = Arc::new(MemoryLog::new());
        let headers = Headers {
            rejected: Some(true),
            rejected_group: Some("other".to_string()),
            ..Default::default()
        };
        let event = seed_event(&log, "a", &headers).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let actions = counting_actions(calls.clone(), "a");

        let processor = Processor::new(log.clone(), &config(3, 10), HookBus::new());
        processor.process("s", vec![event], &actions).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pending_len(&log).await, 0);
    }

    #[tokio::test]
    async fn own_rejects_are_redispatched() {
        let log = Arc::new(MemoryLog::new());
        let headers = Headers {
            rejected: Some(true),
            rejected_group: Some("g".to_string()),
            ..Default::default()
        };
        let event = seed_event(&log, "a", &headers).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let actions = counting_actions(calls.clone(), "a");

        let processor = Processor::new(log.clone(), &config(3, 10), HookBus::new());
        processor.process("s", vec![event], &actions).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_reject_without_dispatch() {
        let log = Arc::new(MemoryLog::new());
        let mut event = seed_event(&log, "a", &Headers::default()).await;
        event.attempt = 3;

        let calls = Arc::new(AtomicUsize::new(0));
        let actions = counting_actions(calls.clone(), "a");

        let hooks = HookBus::new();
        let rejected = Arc::new(AtomicUsize::new(0));
        {
            let rejected = rejected.clone();
            hooks.on_rejected(move |_| {
                rejected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let processor = Processor::new(log.clone(), &config(3, 10), hooks);
        processor.process("s", vec![event], &actions).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(pending_len(&log).await, 0);
        assert_eq!(log.len("dead_letter").await.unwrap(), 1);

        let dead = log.range("dead_letter", 1).await.unwrap();
        let headers: Headers =
            serde_json::from_str(dead[0].field("headers").unwrap()).unwrap();
        assert_eq!(headers.rejected, Some(true));
        assert_eq!(headers.rejected_group.as_deref(), Some("g"));
        assert!(headers.rejected_timestamp.is_some());
    }

    #[tokio::test]
    async fn failure_with_budget_left_stays_pending() {
        let log = Arc::new(MemoryLog::new());
        let event = seed_event(&log, "a", &Headers::default()).await;

        let mut registry = ChannelRegistry::new();
        registry.channel("s").action(
            "a",
            ActionFn::arc(|_event: Event, _ack: AckHandle| async move {
                Err(HandlerError::failed("boom"))
            }),
        );
        let actions = registry.snapshot().actions("s").clone();

        let hooks = HookBus::new();
        let failed = Arc::new(AtomicUsize::new(0));
        {
            let failed = failed.clone();
            hooks.on_failed(move |_| {
                failed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let processor = Processor::new(log.clone(), &config(3, 10), hooks);
        processor.process("s", vec![event], &actions).await;

        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(pending_len(&log).await, 1);
        assert_eq!(log.len("dead_letter").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_at_budget_rejects_immediately() {
        let log = Arc::new(MemoryLog::new());
        let event = seed_event(&log, "a", &Headers::default()).await;

        let mut registry = ChannelRegistry::new();
        registry.channel("s").action(
            "a",
            ActionFn::arc(|_event: Event, _ack: AckHandle| async move {
                Err(HandlerError::failed("boom"))
            }),
        );
        let actions = registry.snapshot().actions("s").clone();

        let processor = Processor::new(log.clone(), &config(1, 10), HookBus::new());
        processor.process("s", vec![event], &actions).await;

        assert_eq!(pending_len(&log).await, 0);
        assert_eq!(log.len("dead_letter").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_handler_still_confirms_later() {
        let log = Arc::new(MemoryLog::new());
        let event = seed_event(&log, "a", &Headers::default()).await;

        let mut registry = ChannelRegistry::new();
        registry.channel("s").action(
            "a",
            ActionFn::arc(|_event: Event, ack: AckHandle| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                ack.ack()
                    .await
                    .map_err(|e| HandlerError::failed(e.to_string()))
            }),
        );
        let actions = registry.snapshot().actions("s").clone();

        let hooks = HookBus::new();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let confirmed = Arc::new(AtomicUsize::new(0));
        {
            let timeouts = timeouts.clone();
            hooks.on_timeout(move |_| {
                timeouts.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let confirmed = confirmed.clone();
            hooks.on_confirmed(move |_| {
                confirmed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut cfg = config(3, 10);
        cfg.process_timeout_ms = 50;
        let processor = Processor::new(log.clone(), &cfg, hooks);
        processor.process("s", vec![event], &actions).await;

        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(confirmed.load(Ordering::SeqCst), 0);

        // The detached handler finishes and its ack drains the pending list.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(confirmed.load(Ordering::SeqCst), 1);
        assert_eq!(pending_len(&log).await, 0);
        assert_eq!(log.len("dead_letter").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_of_one_serialises_dispatch() {
        let log = Arc::new(MemoryLog::new());
        log.group_create("s", "g").await.unwrap();
        for _ in 0..3 {
            let fields = codec::encode("a", &json!({}), &Headers::default(), "pub");
            log.append("s", &fields).await.unwrap();
        }
        let slices = log
            .group_read("g", "c", &["s".to_string()], 10, Duration::from_millis(1))
            .await
            .unwrap();
        let events: Vec<Event> = slices[0]
            .records
            .iter()
            .map(|r| codec::decode("s", r).unwrap())
            .collect();

        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(Mutex::new(0usize));

        let mut registry = ChannelRegistry::new();
        registry.channel("s").action("a", {
            let active = active.clone();
            let max_active = max_active.clone();
            ActionFn::arc(move |_event: Event, ack: AckHandle| {
                let active = active.clone();
                let max_active = max_active.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    {
                        let mut max = max_active.lock().unwrap();
                        *max = (*max).max(now);
                    }
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    ack.ack()
                        .await
                        .map_err(|e| HandlerError::failed(e.to_string()))
                }
            })
        });
        let actions = registry.snapshot().actions("s").clone();

        let processor = Processor::new(log.clone(), &config(3, 1), HookBus::new());
        processor.process("s", events, &actions).await;

        assert_eq!(*max_active.lock().unwrap(), 1);
        assert_eq!(pending_len(&log).await, 0);
    }
}
