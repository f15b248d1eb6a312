//! Subscriber supervisor.
//!
//! [`Subscriber`] owns the channel registry and the lifetimes of the
//! consumer loops and the trimmer. Handlers are registered through
//! [`Subscriber::stream`] before [`Subscriber::listen`]; `listen` creates
//! the consumer group on every configured stream (an existing group is
//! fine), snapshots the registry, and launches the live consumer, the
//! pending consumer and, when configured, the trimmer. [`Subscriber::stop`]
//! signals all of them, waits for in-flight batches to finish, and is
//! idempotent.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulex::{ActionFn, RedisLog, Subscriber, SubscriberConfig};
//!
//! let log = Arc::new(RedisLog::from_url("redis://localhost:6379")?);
//! let mut subscriber = Subscriber::new(
//!     log,
//!     SubscriberConfig::new("billing", vec!["users".into()]),
//! )?;
//!
//! subscriber.stream("users").action("u_created", ActionFn::arc(|event, ack| async move {
//!     // handle, then confirm
//!     ack.ack().await.ok();
//!     Ok(())
//! }));
//!
//! subscriber.listen().await?;
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::{Channel, ChannelRegistry};
use crate::config::{ConfigError, SubscriberConfig};
use crate::consumer::live::LiveConsumer;
use crate::consumer::pending::PendingConsumer;
use crate::hooks::HookBus;
use crate::log::{LogError, StreamLog};
use crate::processor::Processor;
use crate::shutdown::StopSignal;
use crate::trimmer::Trimmer;

/// Consumer-group subscriber over a set of streams.
pub struct Subscriber {
    log: Arc<dyn StreamLog>,
    config: SubscriberConfig,
    registry: ChannelRegistry,
    hooks: HookBus,
    stop: StopSignal,
    tasks: Vec<JoinHandle<()>>,
    listening: bool,
}

impl Subscriber {
    /// Fails when the configuration names no group or no streams. All
    /// timing and sizing knobs are clamped to their minimum bounds here.
    pub fn new(log: Arc<dyn StreamLog>, config: SubscriberConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            log,
            config: config.clamped(),
            registry: ChannelRegistry::new(),
            hooks: HookBus::new(),
            stop: StopSignal::new(),
            tasks: Vec::new(),
            listening: false,
        })
    }

    /// Channel for registering action handlers on `stream`. Only streams
    /// named in the configuration are consumed; registration on another
    /// stream is inert.
    pub fn stream(&mut self, stream: &str) -> &mut Channel {
        if !self.config.streams.iter().any(|s| s == stream) {
            warn!(stream = %stream, "registering handlers on a stream the subscriber is not configured to consume");
        }
        self.registry.channel(stream)
    }

    /// Hook surface (`confirmed`, `rejected`, `timeout`, `failed`).
    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    /// Create groups and launch the consumer loops (and trimmer, when
    /// configured). Idempotent while running.
    pub async fn listen(&mut self) -> Result<(), LogError> {
        if self.listening {
            return Ok(());
        }

        for stream in &self.config.streams {
            self.log.group_create(stream, &self.config.group).await?;
        }

        let registry = Arc::new(self.registry.snapshot());
        let client_id = self.config.resolved_client_id();

        let live = LiveConsumer::new(
            self.log.clone(),
            &self.config,
            client_id.clone(),
            registry.clone(),
            Processor::new(self.log.clone(), &self.config, self.hooks.clone()),
            self.stop.clone(),
        );
        let pending = PendingConsumer::new(
            self.log.clone(),
            &self.config,
            client_id.clone(),
            registry,
            Processor::new(self.log.clone(), &self.config, self.hooks.clone()),
            self.stop.clone(),
        );

        self.tasks.push(tokio::spawn(live.run()));
        self.tasks.push(tokio::spawn(pending.run()));

        if let Some(trimmer_config) = &self.config.trimmer {
            let trimmer = Trimmer::new(
                self.log.clone(),
                self.config.group.clone(),
                self.config.streams.clone(),
                trimmer_config,
                self.stop.clone(),
            );
            self.tasks.push(tokio::spawn(trimmer.run()));
        }

        self.listening = true;
        info!(
            group = %self.config.group,
            client_id = %client_id,
            streams = ?self.config.streams,
            trimmer = self.config.trimmer.is_some(),
            "subscriber listening"
        );
        Ok(())
    }

    /// Signal every loop to stop and wait for in-flight batches to finish.
    /// Idempotent.
    pub async fn stop(&mut self) {
        if !self.listening && self.tasks.is_empty() {
            return;
        }

        self.stop.trigger();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.listening = false;
        info!(group = %self.config.group, "subscriber stopped");
    }
}
