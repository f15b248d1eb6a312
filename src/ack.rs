//! One-shot acknowledgement capability.
//!
//! Every delivery hands its handler an [`AckHandle`] bound to that
//! delivery's `(stream, group, id)`. Calling [`AckHandle::ack`] performs
//! the group acknowledgement under the engine's retrier and fires the
//! `confirmed` hook. The handle is one-shot: repeat calls after the first
//! are no-ops beyond a diagnostic, and the log itself treats a duplicate
//! acknowledgement as a no-op, so double-acking can never cause a
//! redelivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::event::Event;
use crate::hooks::HookBus;
use crate::log::{LogError, StreamLog};
use crate::retry::Retrier;

/// Acknowledgement capability for a single delivery.
pub struct AckHandle {
    log: Arc<dyn StreamLog>,
    group: String,
    event: Event,
    retrier: Retrier,
    hooks: HookBus,
    acked: Arc<AtomicBool>,
}

impl AckHandle {
    pub(crate) fn new(
        log: Arc<dyn StreamLog>,
        group: String,
        event: Event,
        retrier: Retrier,
        hooks: HookBus,
        acked: Arc<AtomicBool>,
    ) -> Self {
        Self {
            log,
            group,
            event,
            retrier,
            hooks,
            acked,
        }
    }

    /// Acknowledge this delivery.
    ///
    /// On success the event is confirmed for the group and the `confirmed`
    /// hook fires. On failure (after the retry budget) the handle resets so
    /// the acknowledgement may be attempted again; the record stays in the
    /// pending list either way, so reclaim still covers it.
    pub async fn ack(&self) -> Result<(), LogError> {
        if self.acked.swap(true, Ordering::SeqCst) {
            warn!(
                id = %self.event.id,
                stream = %self.event.stream,
                "duplicate confirmation ignored"
            );
            return Ok(());
        }

        let result = self
            .retrier
            .run(|| self.log.ack(&self.event.stream, &self.group, &self.event.id))
            .await;

        match result {
            Ok(()) => {
                debug!(
                    id = %self.event.id,
                    stream = %self.event.stream,
                    group = %self.group,
                    "event confirmed"
                );
                self.hooks.emit_confirmed(&self.event);
                Ok(())
            }
            Err(e) => {
                self.acked.store(false, Ordering::SeqCst);
                error!(
                    id = %self.event.id,
                    stream = %self.event.stream,
                    error = %e,
                    "confirmation failed"
                );
                Err(e)
            }
        }
    }

    /// Whether this delivery has been acknowledged.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}
