//! Edge-triggered live-state notifications
//!
//! [`NotificationDispatcher::notify`] is called by the scheduler on every
//! observed transition. It compares against the persisted notification
//! state, so a transition is announced at most once even across restarts.
//! A failed delivery leaves that state untouched and is not retried.

use crate::error::ExternalApiError;
use crate::metrics;
use crate::models::StreamInfo;
use crate::store::{PublisherStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination for notification messages. One attempt per call.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), ExternalApiError>;

    /// Label used in logs and metrics
    fn name(&self) -> &'static str;
}

/// Sink used when no external destination is configured
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) -> Result<(), ExternalApiError> {
        info!(%message, "Live status notification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// The last delivered notification already carried this state
    AlreadyNotified,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] ExternalApiError),
}

pub fn render_message(channel: &str, is_live: bool, info: Option<&StreamInfo>) -> String {
    if !is_live {
        return format!("{channel} is no longer live.");
    }

    let mut message = format!("{channel} is now live on Twitch! https://twitch.tv/{channel}");
    if let Some(info) = info {
        if !info.title.is_empty() {
            message.push_str(&format!("\n{}", info.title));
        }
        if !info.category.is_empty() {
            message.push_str(&format!(" [{}]", info.category));
        }
    }
    message
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: PublisherStore,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
    pub fn new(store: PublisherStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Announce `is_live` for `channel` unless it was the last state
    /// successfully announced. A channel never announced counts as offline.
    pub async fn notify(
        &self,
        channel: &str,
        is_live: bool,
        info: Option<&StreamInfo>,
    ) -> Result<NotifyOutcome, DispatchError> {
        let last = self.store.last_notified(channel).await?.unwrap_or(false);
        if last == is_live {
            debug!(%channel, is_live, "Notification state unchanged, skipping");
            metrics::record_notification(self.sink.name(), "skipped");
            return Ok(NotifyOutcome::AlreadyNotified);
        }

        let message = render_message(channel, is_live, info);
        if let Err(e) = self.sink.send(&message).await {
            warn!(%channel, is_live, sink = self.sink.name(), error = %e, "Notification delivery failed");
            metrics::record_notification(self.sink.name(), "failed");
            return Err(e.into());
        }

        self.store.set_last_notified(channel, is_live, Utc::now()).await?;
        info!(%channel, is_live, sink = self.sink.name(), "Notification delivered");
        metrics::record_notification(self.sink.name(), "delivered");
        Ok(NotifyOutcome::Delivered)
    }
}
