//! Per-stream action registry.
//!
//! A [`Channel`] maps action names to handlers for one stream; the
//! [`ChannelRegistry`] holds one channel per stream. Lookup is an exact
//! match on the action name and the last registration for a name wins.
//! Registration happens before `listen`; the subscriber then takes an
//! immutable snapshot, so dispatch never races with registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::handler::Handler;

/// Action-name to handler map for one stream.
pub type ActionMap = HashMap<String, Arc<dyn Handler>>;

/// Handlers registered for a single stream.
#[derive(Default)]
pub struct Channel {
    actions: ActionMap,
}

impl Channel {
    /// Register a handler for `action`. A handler already registered under
    /// the same name is replaced.
    pub fn action(&mut self, action: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        let action = action.into();
        let replaced = self.actions.insert(action.clone(), handler).is_some();
        debug!(action = %action, replaced, "handler registered");
        self
    }

    /// Actions registered on this channel.
    pub fn actions(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// All channels of a subscriber, keyed by stream name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel for `stream`, created on first use.
    pub fn channel(&mut self, stream: impl Into<String>) -> &mut Channel {
        self.channels.entry(stream.into()).or_default()
    }

    /// Streams that have at least one channel.
    pub fn streams(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Immutable view handed to the consumers at `listen` time.
    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            channels: self
                .channels
                .iter()
                .map(|(stream, channel)| (stream.clone(), channel.actions.clone()))
                .collect(),
            empty: ActionMap::new(),
        }
    }
}

/// Read-only registry view shared by the consumer loops.
pub(crate) struct RegistrySnapshot {
    channels: HashMap<String, ActionMap>,
    empty: ActionMap,
}

impl RegistrySnapshot {
    /// Action map for `stream`; empty when the stream has no channel, in
    /// which case every event on it is acknowledged as unhandled.
    pub(crate) fn actions(&self, stream: &str) -> &ActionMap {
        self.channels.get(stream).unwrap_or(&self.empty)
    }
}
