//! Action handlers.
//!
//! The [`Handler`] trait is the unit of user code the engine dispatches
//! to. Handlers receive the decoded [`Event`] and its one-shot
//! [`AckHandle`]; calling `ack` confirms the delivery, returning without it
//! leaves the event to be reclaimed after the ack timeout, and returning an
//! error (or panicking) counts as a failed attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulex::{ActionFn, Event, AckHandle, HandlerError};
//!
//! let handler = ActionFn::arc(|event: Event, ack: AckHandle| async move {
//!     println!("user created: {}", event.payload);
//!     ack.ack().await.map_err(|e| HandlerError::Failed(e.to_string()))?;
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ack::AckHandle;
use crate::event::Event;

/// Errors a handler can raise. A failed attempt is retried until the
/// engine's retry budget is spent, then rejected to the dead-letter.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Generic handler failure.
    #[error("{0}")]
    Failed(String),

    /// Payload did not have the shape the handler expected.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A unit of user code bound to one action name.
///
/// Handlers must be `Send + Sync`; the engine runs them as spawned tasks
/// so a timed-out handler keeps running in the background.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: Event, ack: AckHandle) -> Result<(), HandlerError>;
}

/// Function-backed handler.
///
/// Wraps a closure that creates a fresh future per delivery; shared state
/// goes through an explicit `Arc` inside the closure.
pub struct ActionFn<F> {
    f: F,
}

impl<F> ActionFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Create the handler and return it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for ActionFn<F>
where
    F: Fn(Event, AckHandle) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event, ack: AckHandle) -> Result<(), HandlerError> {
        (self.f)(event, ack).await
    }
}
