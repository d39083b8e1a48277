//! Service configuration
//!
//! Read once from the environment at startup and handed to each component by
//! value. A missing credential for an enabled integration or an unusable
//! listen port is a [`ConfigError`]; anything else that fails to parse falls
//! back to its default with a warning.

use crate::services::scheduler::SchedulerConfig;
use crate::store::StoreConfig;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9090;
const DEFAULT_RTMP_PORT: &str = "1935";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_POLL_RATE_SECS: i64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("{key} must be set when {feature} is enabled")]
    MissingRequired {
        key: &'static str,
        feature: &'static str,
    },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Raw environment as strings; validated in [`Config::from_vars`]
#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    auth_server_ip: Option<String>,
    auth_server_port: Option<String>,
    rtmp_server_fqdn: Option<String>,
    rtmp_server_port: Option<String>,
    data_path: Option<String>,
    db_max_connections: Option<String>,
    admin_token: Option<String>,
    twitch_enabled: Option<String>,
    twitch_client_id: Option<String>,
    twitch_client_secret: Option<String>,
    twitch_poll_rate: Option<String>,
    twitch_request_timeout: Option<String>,
    discord_enabled: Option<String>,
    discord_webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct TwitchSettings {
    pub client_id: String,
    pub client_secret: String,
    pub scheduler: SchedulerConfig,
}

impl fmt::Debug for TwitchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[derive(Clone)]
pub struct DiscordSettings {
    pub webhook_url: String,
}

impl fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordSettings")
            .field("webhook_url", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    /// When set, the management API requires a matching `x-admin-token`
    pub admin_token: Option<String>,
    /// `rtmp://fqdn:port`, returned to newly created publishers
    pub rtmp_server_url: Option<String>,
    /// `None` when the Twitch integration is disabled
    pub twitch: Option<TwitchSettings>,
    /// `None` when Discord delivery is disabled
    pub discord: Option<DiscordSettings>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("store", &self.store)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("rtmp_server_url", &self.rtmp_server_url)
            .field("twitch", &self.twitch)
            .field("discord", &self.discord)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawEnv = envy::from_iter(vars)?;

        let host = non_empty(raw.auth_server_ip).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match non_empty(raw.auth_server_port) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "AUTH_SERVER_PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let data_path = non_empty(raw.data_path).unwrap_or_else(|| ".".to_string());
        let mut store = StoreConfig::in_dir(data_path);
        store.max_connections = parse_number(
            "DB_MAX_CONNECTIONS",
            raw.db_max_connections.as_deref(),
            DEFAULT_DB_MAX_CONNECTIONS,
        )
        .max(1);

        let rtmp_server_url = non_empty(raw.rtmp_server_fqdn).map(|fqdn| {
            let port = non_empty(raw.rtmp_server_port).unwrap_or_else(|| DEFAULT_RTMP_PORT.to_string());
            format!("rtmp://{fqdn}:{port}")
        });

        let twitch = if parse_flag("TWITCH_ENABLED", raw.twitch_enabled.as_deref()) {
            let client_id = non_empty(raw.twitch_client_id).ok_or(ConfigError::MissingRequired {
                key: "TWITCH_CLIENT_ID",
                feature: "TWITCH_ENABLED",
            })?;
            let client_secret =
                non_empty(raw.twitch_client_secret).ok_or(ConfigError::MissingRequired {
                    key: "TWITCH_CLIENT_SECRET",
                    feature: "TWITCH_ENABLED",
                })?;
            let poll_rate = parse_number(
                "TWITCH_POLL_RATE",
                raw.twitch_poll_rate.as_deref(),
                DEFAULT_POLL_RATE_SECS,
            )
            .max(0) as u64;
            let request_timeout = parse_number(
                "TWITCH_REQUEST_TIMEOUT",
                raw.twitch_request_timeout.as_deref(),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            );
            Some(TwitchSettings {
                client_id,
                client_secret,
                scheduler: SchedulerConfig::new(
                    Duration::from_secs(poll_rate),
                    Duration::from_secs(request_timeout.max(1)),
                ),
            })
        } else {
            None
        };

        let discord = if parse_flag("DISCORD_ENABLED", raw.discord_enabled.as_deref()) {
            let webhook_url = non_empty(raw.discord_webhook).ok_or(ConfigError::MissingRequired {
                key: "DISCORD_WEBHOOK",
                feature: "DISCORD_ENABLED",
            })?;
            Some(DiscordSettings { webhook_url })
        } else {
            None
        };

        Ok(Self {
            server: ServerConfig { host, port },
            store,
            admin_token: non_empty(raw.admin_token),
            rtmp_server_url,
            twitch,
            discord,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `1`/`t`/`true` or `0`/`f`/`false` in the usual casings
fn parse_flag(key: &'static str, value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => {
            debug!(key, "Flag not set, defaulting to false");
            false
        }
        Some("1" | "t" | "T" | "true" | "TRUE" | "True") => true,
        Some("0" | "f" | "F" | "false" | "FALSE" | "False") => false,
        Some(other) => {
            warn!(key, value = other, "Invalid boolean, defaulting to false");
            false
        }
    }
}

fn parse_number<T>(key: &'static str, value: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + fmt::Display + Copy,
{
    match value.map(str::trim) {
        None | Some("") => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = raw, %default, "Invalid number, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scheduler::MIN_POLL_INTERVAL;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config.server.bind_address(), "127.0.0.1:9090");
        assert_eq!(config.store.path, std::path::Path::new(".").join("rtmpauthbot.db"));
        assert_eq!(config.store.max_connections, 5);
        assert!(config.twitch.is_none());
        assert!(config.discord.is_none());
        assert!(config.admin_token.is_none());
        assert!(config.rtmp_server_url.is_none());
    }

    #[test]
    fn test_server_and_rtmp_url() {
        let config = Config::from_vars(vars(&[
            ("AUTH_SERVER_IP", "0.0.0.0"),
            ("AUTH_SERVER_PORT", "8088"),
            ("RTMP_SERVER_FQDN", "live.example.com"),
            ("DATA_PATH", "/var/lib/rtmpauthbot"),
        ]))
        .unwrap();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8088");
        assert_eq!(config.rtmp_server_url.as_deref(), Some("rtmp://live.example.com:1935"));
        assert_eq!(
            config.store.path,
            std::path::Path::new("/var/lib/rtmpauthbot").join("rtmpauthbot.db")
        );
    }

    #[test]
    fn test_invalid_port_is_fatal() {
        let err = Config::from_vars(vars(&[("AUTH_SERVER_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "AUTH_SERVER_PORT", .. }));
    }

    #[test]
    fn test_twitch_requires_credentials() {
        let err = Config::from_vars(vars(&[("TWITCH_ENABLED", "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { key: "TWITCH_CLIENT_ID", .. }));

        let err = Config::from_vars(vars(&[
            ("TWITCH_ENABLED", "1"),
            ("TWITCH_CLIENT_ID", "id"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { key: "TWITCH_CLIENT_SECRET", .. }));
    }

    #[test]
    fn test_discord_requires_webhook() {
        let err = Config::from_vars(vars(&[("DISCORD_ENABLED", "T")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { key: "DISCORD_WEBHOOK", .. }));
    }

    #[test]
    fn test_invalid_flag_defaults_to_disabled() {
        let config = Config::from_vars(vars(&[("TWITCH_ENABLED", "yes please")])).unwrap();
        assert!(config.twitch.is_none());
    }

    #[test]
    fn test_poll_rate_is_clamped() {
        let twitch = |rate: &str| {
            Config::from_vars(vars(&[
                ("TWITCH_ENABLED", "true"),
                ("TWITCH_CLIENT_ID", "id"),
                ("TWITCH_CLIENT_SECRET", "secret"),
                ("TWITCH_POLL_RATE", rate),
            ]))
            .unwrap()
            .twitch
            .unwrap()
        };

        assert_eq!(twitch("2").scheduler.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(twitch("-30").scheduler.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(twitch("not-a-number").scheduler.poll_interval, Duration::from_secs(60));
        assert_eq!(twitch("120").scheduler.poll_interval, Duration::from_secs(120));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = Config::from_vars(vars(&[
            ("TWITCH_ENABLED", "true"),
            ("TWITCH_CLIENT_ID", "id"),
            ("TWITCH_CLIENT_SECRET", "hunter2"),
            ("ADMIN_TOKEN", "s3cret"),
        ]))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret"));
    }
}
