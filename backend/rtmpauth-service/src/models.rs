//! Records kept in the publisher store and returned by the management API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A registered identity allowed to start an RTMP publish session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: Uuid,
    /// Secret publish credential, unique across all publishers
    pub stream_key: String,
    pub created_at: DateTime<Utc>,
}

/// Local RTMP live state of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RtmpLiveState {
    pub is_live: bool,
    pub since: DateTime<Utc>,
}

/// Metadata reported by the external platform for a live channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub title: String,
    pub category: String,
    pub viewer_count: i64,
}

/// Result of a single status query against the external platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub is_live: bool,
    pub info: StreamInfo,
}

impl StreamStatus {
    pub fn offline() -> Self {
        Self {
            is_live: false,
            info: StreamInfo::default(),
        }
    }

    pub fn live(info: StreamInfo) -> Self {
        Self {
            is_live: true,
            info,
        }
    }
}

/// Last observed external live state of a bound channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalLiveState {
    pub channel: String,
    pub is_live: bool,
    pub observed_at: DateTime<Utc>,
    pub info: Option<StreamInfo>,
}

/// Listing view of a publisher. Never carries the stream key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_live: bool,
    pub live_since: Option<DateTime<Utc>>,
    pub channel: Option<String>,
}

/// Body returned when a publisher is created; the only time the key is shown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePublisherResponse {
    pub id: Uuid,
    pub stream_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

/// Channel login to bind; lowercased by the handler before validation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BindChannelRequest {
    #[validate(
        length(min = 1, max = 25),
        custom(function = "crate::validators::validate_channel_login")
    )]
    pub channel: String,
}
