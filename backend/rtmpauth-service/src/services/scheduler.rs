//! Background live-status scheduler
//!
//! One task per process. Every poll interval it queries the external status
//! of each bound channel, writes the result only when it differs from the
//! stored state, and hands transitions to the notification dispatcher.
//!
//! # Failure handling
//! - A failing or slow channel is skipped for the current tick only; its
//!   stored state is left as is and the remaining channels are still polled.
//! - Shutdown is checked at the top of each tick and before each channel.
//!   A query already in flight runs to completion or to its timeout.

use super::notifier::{NotificationDispatcher, NotifyOutcome};
use crate::error::ExternalApiError;
use crate::metrics;
use crate::models::StreamStatus;
use crate::store::PublisherStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lowest poll interval accepted, to stay inside external API rate limits
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// External platform queried for a channel's live status
#[async_trait]
pub trait StreamStatusSource: Send + Sync {
    async fn get_status(&self, channel: &str) -> Result<StreamStatus, ExternalApiError>;

    /// Label used in logs and errors
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Upper bound for a single status query
    pub request_timeout: Duration,
}

impl SchedulerConfig {
    /// Clamps the poll interval to [`MIN_POLL_INTERVAL`] and the request
    /// timeout to the poll interval.
    pub fn new(poll_interval: Duration, request_timeout: Duration) -> Self {
        let poll_interval = clamp_poll_interval(poll_interval);
        Self {
            poll_interval,
            request_timeout: request_timeout.min(poll_interval),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT)
    }
}

pub fn clamp_poll_interval(requested: Duration) -> Duration {
    if requested < MIN_POLL_INTERVAL {
        warn!(
            requested_secs = requested.as_secs_f64(),
            min_secs = MIN_POLL_INTERVAL.as_secs(),
            "Poll interval below minimum, clamping"
        );
        MIN_POLL_INTERVAL
    } else {
        requested
    }
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub transitions: usize,
    pub notified: usize,
    pub skipped: usize,
    /// Shutdown was observed before all channels were polled
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOutcome {
    Unchanged,
    Transition { notified: bool },
    Skipped,
}

pub struct LiveStatusScheduler {
    store: PublisherStore,
    source: Arc<dyn StreamStatusSource>,
    dispatcher: NotificationDispatcher,
    config: SchedulerConfig,
}

impl LiveStatusScheduler {
    pub fn new(
        store: PublisherStore,
        source: Arc<dyn StreamStatusSource>,
        dispatcher: NotificationDispatcher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            source,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Run the poll loop on its own task until `shutdown` becomes `true`
    /// (or its sender is dropped).
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            request_timeout_secs = self.config.request_timeout.as_secs(),
            source = self.source.name(),
            sink = self.dispatcher.sink_name(),
            "Starting live status scheduler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.run_tick(&shutdown).await;
            debug!(?report, "Poll tick finished");
            if report.cancelled {
                break;
            }
        }

        info!("Live status scheduler stopped");
    }

    /// Poll every bound channel once
    pub async fn run_tick(&self, shutdown: &watch::Receiver<bool>) -> TickReport {
        let mut report = TickReport::default();
        if *shutdown.borrow() {
            report.cancelled = true;
            return report;
        }

        let channels = match self.store.bound_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                error!(error = %e, "Failed to list channel bindings, skipping tick");
                return report;
            }
        };

        for channel in &channels {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }

            report.checked += 1;
            match self.poll_channel(channel).await {
                ChannelOutcome::Unchanged => {}
                ChannelOutcome::Transition { notified } => {
                    report.transitions += 1;
                    if notified {
                        report.notified += 1;
                    }
                }
                ChannelOutcome::Skipped => report.skipped += 1,
            }
        }

        report
    }

    async fn poll_channel(&self, channel: &str) -> ChannelOutcome {
        let limit = self.config.request_timeout;
        let status = match timeout(limit, self.source.get_status(channel)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(%channel, error = %e, "Status query failed, skipping channel this tick");
                metrics::record_poll("error");
                return ChannelOutcome::Skipped;
            }
            Err(_) => {
                let e = ExternalApiError::Timeout {
                    service: self.source.name(),
                    elapsed: limit,
                };
                warn!(%channel, error = %e, "Status query timed out, skipping channel this tick");
                metrics::record_poll("timeout");
                return ChannelOutcome::Skipped;
            }
        };

        let changed = match self
            .store
            .record_external_status(channel, &status, Utc::now())
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                error!(%channel, error = %e, "Failed to store external status, skipping channel this tick");
                metrics::record_poll("storage_error");
                return ChannelOutcome::Skipped;
            }
        };

        if !changed {
            metrics::record_poll("unchanged");
            return ChannelOutcome::Unchanged;
        }

        metrics::record_poll("transition");
        info!(%channel, is_live = status.is_live, "External live state changed");

        let info = status.is_live.then_some(&status.info);
        let notified = match self.dispatcher.notify(channel, status.is_live, info).await {
            Ok(NotifyOutcome::Delivered) => true,
            Ok(NotifyOutcome::AlreadyNotified) => false,
            Err(e) => {
                warn!(%channel, error = %e, "Transition recorded but not announced");
                false
            }
        };

        ChannelOutcome::Transition { notified }
    }
}
