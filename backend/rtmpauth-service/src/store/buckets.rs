use std::fmt;

/// Logical buckets of the publisher store. Each bucket is one SQLite table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// General configuration and caching (e.g. the Twitch app token)
    Config,
    /// Publisher id -> stream key
    Publisher,
    /// Publisher id -> local RTMP live state
    RtmpLive,
    /// Publisher id -> external channel name
    ChannelBinding,
    /// Channel -> external live state
    ExternalLive,
    /// Channel -> last successfully notified live state
    NotificationState,
    /// Channel -> stream metadata captured at the last transition
    StreamInfo,
}

impl Bucket {
    pub const ALL: &'static [Bucket] = &[
        Bucket::Config,
        Bucket::Publisher,
        Bucket::RtmpLive,
        Bucket::ChannelBinding,
        Bucket::ExternalLive,
        Bucket::NotificationState,
        Bucket::StreamInfo,
    ];

    /// Table backing the bucket
    pub fn name(self) -> &'static str {
        match self {
            Bucket::Config => "config",
            Bucket::Publisher => "publishers",
            Bucket::RtmpLive => "rtmp_live",
            Bucket::ChannelBinding => "channel_bindings",
            Bucket::ExternalLive => "external_live",
            Bucket::NotificationState => "notification_state",
            Bucket::StreamInfo => "stream_info",
        }
    }

    pub(crate) fn schema(self) -> &'static str {
        match self {
            Bucket::Config => {
                "CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL
                )"
            }
            Bucket::Publisher => {
                "CREATE TABLE IF NOT EXISTS publishers (
                    id BLOB PRIMARY KEY NOT NULL,
                    stream_key TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                )"
            }
            Bucket::RtmpLive => {
                "CREATE TABLE IF NOT EXISTS rtmp_live (
                    publisher_id BLOB PRIMARY KEY NOT NULL,
                    is_live INTEGER NOT NULL DEFAULT 0,
                    since TEXT NOT NULL
                )"
            }
            Bucket::ChannelBinding => {
                "CREATE TABLE IF NOT EXISTS channel_bindings (
                    publisher_id BLOB PRIMARY KEY NOT NULL,
                    channel TEXT NOT NULL
                )"
            }
            Bucket::ExternalLive => {
                "CREATE TABLE IF NOT EXISTS external_live (
                    channel TEXT PRIMARY KEY NOT NULL,
                    is_live INTEGER NOT NULL,
                    observed_at TEXT NOT NULL
                )"
            }
            Bucket::NotificationState => {
                "CREATE TABLE IF NOT EXISTS notification_state (
                    channel TEXT PRIMARY KEY NOT NULL,
                    last_notified_is_live INTEGER NOT NULL,
                    notified_at TEXT NOT NULL
                )"
            }
            Bucket::StreamInfo => {
                "CREATE TABLE IF NOT EXISTS stream_info (
                    channel TEXT PRIMARY KEY NOT NULL,
                    title TEXT NOT NULL,
                    category TEXT NOT NULL,
                    viewer_count INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                )"
            }
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
