//! # Rivulex
//!
//! A messaging runtime on top of Redis Streams: producers append events to
//! named streams; consumer groups fan out, process, acknowledge and retry
//! them with at-least-once delivery, FIFO order per stream, bounded
//! retries and a dead-letter sink. A background trimmer reclaims
//! retention-expired records under advisory cross-instance coordination.
//!
//! ## Architecture
//!
//! ```text
//! Publisher -> Stream ─┬─> Live consumer ────┐
//!                      │   (new entries)     ├─> Processor -> Handler -> ack
//!                      └─> Pending consumer ─┘        │
//!                          (idle reclaims)            └─> dead_letter
//! ```
//!
//! ## Modules
//!
//! - [`publisher`]: single and batched appends with lifecycle hooks
//! - [`subscriber`]: the supervisor owning consumers and trimmer
//! - [`processor`]: dispatch, timeout, acknowledgement and rejection
//! - [`consumer`]: the live and pending loops
//! - [`trimmer`]: distributed retention enforcement
//! - [`log`]: the stream log abstraction with Redis and in-memory backends
//! - [`hooks`]: in-process lifecycle hook bus
//!
//! ## Delivery semantics
//!
//! Every appended event is eventually either confirmed after at least one
//! handler call, or appended exactly once to the dead-letter stream and
//! acknowledged at the source. A handler sees an event at most `retries`
//! times; a timed-out handler is not cancelled and its late ack still
//! confirms the event if it lands before the ack timeout.

pub mod ack;
pub mod backoff;
pub mod channel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod event;
pub mod handler;
pub mod hooks;
pub mod log;
pub mod processor;
pub mod publisher;
pub mod retry;
pub mod shutdown;
pub mod subscriber;
pub mod trimmer;

pub use ack::AckHandle;
pub use backoff::Backoff;
pub use channel::{ActionMap, Channel, ChannelRegistry};
pub use codec::CodecError;
pub use config::{
    ConfigError, PublisherConfig, RedisConfig, RivulexConfig, SubscriberConfig, TrimmerConfig,
    DEFAULT_DEAD_LETTER,
};
pub use event::{Event, Headers, PublishEntry};
pub use handler::{ActionFn, Handler, HandlerError};
pub use hooks::{FailedHook, HookBus, PublishedHook};
pub use log::{LogError, MemoryLog, RedisLog, StreamLog};
pub use publisher::Publisher;
pub use retry::Retrier;
pub use shutdown::StopSignal;
pub use subscriber::Subscriber;
