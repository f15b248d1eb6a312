//! Stop signalling for the consumer loops and the trimmer.
//!
//! [`StopSignal`] is a broadcast flag: triggering it wakes every loop that
//! is parked in a blocking read, a backoff pause or a trimmer sleep, and
//! the flag stays set so loops that check between iterations see it too.
//! Embedding applications that want OS-signal handling install their own
//! handler and call [`StopSignal::trigger`] from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

/// Level-triggered stop flag with broadcast wake-up.
#[derive(Clone)]
pub struct StopSignal {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the stop and wake every waiting loop. Idempotent.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            debug!("stop signal triggered");
        }
        let _ = self.tx.send(());
    }

    /// Whether the stop has been flagged.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Receiver for use in `select!` arms.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Resolve once the stop is flagged.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = rx.recv().await;
    }
}
