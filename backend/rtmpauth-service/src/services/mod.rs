//! Service layer
//!
//! - Stream-key authentication and local live state (`auth`)
//! - External live-status polling (`scheduler`, `twitch`)
//! - Edge-triggered notifications (`notifier`, `discord`)

pub mod auth;
pub mod discord;
pub mod notifier;
pub mod scheduler;
pub mod twitch;

pub use auth::{AuthValidator, DenyReason, PlayDecision, PublishDecision};
pub use discord::DiscordSink;
pub use notifier::{LogSink, NotificationDispatcher, NotificationSink, NotifyOutcome};
pub use scheduler::{LiveStatusScheduler, SchedulerConfig, StreamStatusSource, TickReport};
pub use twitch::{TwitchClient, TwitchConfig};
