//! Publisher: the append pipeline.
//!
//! [`Publisher`] encodes entries and appends them to streams, firing the
//! `published` hook per appended record and the `failed` hook (plus the
//! error to the caller) when an append does not reach the log. Batches go
//! through one atomic pipeline; a wholesale pipeline failure reports every
//! entry as failed, while per-entry failures inside a surviving pipeline
//! report only those entries.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::codec;
use crate::config::{ConfigError, PublisherConfig};
use crate::event::{Headers, PublishEntry};
use crate::hooks::{FailedHook, HookBus, PublishedHook};
use crate::log::{BatchAppend, LogError, StreamLog};

/// Appends events to streams on behalf of one group.
pub struct Publisher {
    log: Arc<dyn StreamLog>,
    config: PublisherConfig,
    hooks: HookBus,
}

impl Publisher {
    /// Fails when the configuration names no group or no default stream.
    pub fn new(log: Arc<dyn StreamLog>, config: PublisherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            log,
            config,
            hooks: HookBus::new(),
        })
    }

    /// Hook surface (`published`, `failed`).
    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    /// Append one event; `stream` falls back to the configured default.
    /// Returns the ID assigned by the log.
    pub async fn publish(
        &self,
        stream: Option<&str>,
        action: &str,
        payload: Value,
        headers: Option<Headers>,
    ) -> Result<String, LogError> {
        let entry = PublishEntry {
            stream: stream.map(str::to_string),
            action: action.to_string(),
            payload,
            headers: headers.unwrap_or_default(),
        };
        let stream = self.resolve_stream(&entry).to_string();
        let fields = codec::encode(&entry.action, &entry.payload, &entry.headers, &self.config.group);

        match self.log.append(&stream, &fields).await {
            Ok(id) => {
                info!(id = %id, stream = %stream, action = %entry.action, "event published");
                self.hooks.emit_published(&PublishedHook {
                    id: id.clone(),
                    stream,
                    entry,
                });
                Ok(id)
            }
            Err(e) => {
                error!(stream = %stream, action = %entry.action, error = %e, "publish failed");
                self.hooks.emit_failed(&FailedHook::Publish {
                    entry,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Append a batch over one atomic pipeline.
    ///
    /// The outer error is a wholesale pipeline failure, reported as failed
    /// for every entry; the inner results are per-entry outcomes in
    /// submission order.
    pub async fn publish_batch(
        &self,
        entries: Vec<PublishEntry>,
    ) -> Result<Vec<Result<String, LogError>>, LogError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let appends: Vec<BatchAppend> = entries
            .iter()
            .map(|entry| BatchAppend {
                stream: self.resolve_stream(entry).to_string(),
                fields: codec::encode(
                    &entry.action,
                    &entry.payload,
                    &entry.headers,
                    &self.config.group,
                ),
            })
            .collect();

        let results = match self.log.append_batch(&appends).await {
            Ok(results) => results,
            Err(e) => {
                error!(batch = entries.len(), error = %e, "batch publish failed");
                for entry in entries {
                    self.hooks.emit_failed(&FailedHook::Publish {
                        entry,
                        error: e.to_string(),
                    });
                }
                return Err(e);
            }
        };

        let outcomes: Vec<Result<String, LogError>> = entries
            .into_iter()
            .zip(appends)
            .zip(results)
            .map(|((entry, append), result)| match result {
                Ok(id) => {
                    info!(id = %id, stream = %append.stream, action = %entry.action, "event published");
                    self.hooks.emit_published(&PublishedHook {
                        id: id.clone(),
                        stream: append.stream,
                        entry,
                    });
                    Ok(id)
                }
                Err(e) => {
                    error!(stream = %append.stream, action = %entry.action, error = %e, "publish failed");
                    self.hooks.emit_failed(&FailedHook::Publish {
                        entry,
                        error: e.to_string(),
                    });
                    Err(e)
                }
            })
            .collect();

        Ok(outcomes)
    }

    fn resolve_stream<'a>(&'a self, entry: &'a PublishEntry) -> &'a str {
        entry.stream.as_deref().unwrap_or(&self.config.default_stream)
    }
}
