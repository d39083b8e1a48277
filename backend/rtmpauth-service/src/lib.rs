//! RTMP publish authentication and external live-status mirroring
//!
//! The media server's webhook callbacks are validated against registered
//! stream keys, and a background scheduler mirrors each bound channel's
//! Twitch live status into the store, announcing every transition once.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod validators;

pub use error::{AppError, Result};
