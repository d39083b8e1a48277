//! Twitch Helix stream-status source
//!
//! Uses an app access token from the client-credentials grant. The token is
//! cached in memory and in the store's config bucket so a restart does not
//! request a new one, and is dropped when Helix answers 401.

use super::scheduler::StreamStatusSource;
use crate::error::ExternalApiError;
use crate::models::{StreamInfo, StreamStatus};
use crate::store::PublisherStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";
pub const DEFAULT_AUTH_BASE: &str = "https://id.twitch.tv/oauth2";

const TOKEN_CONFIG_KEY: &str = "twitch.app_token";
/// Refresh this long before the advertised expiry
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub auth_base: String,
    pub request_timeout: Duration,
}

impl TwitchConfig {
    pub fn new(client_id: String, client_secret: String, request_timeout: Duration) -> Self {
        Self {
            client_id,
            client_secret,
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            request_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl AppToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::try_seconds(TOKEN_EXPIRY_MARGIN_SECS)
            .and_then(|margin| self.expires_at.checked_sub_signed(margin))
            .is_some_and(|refresh_at| refresh_at > now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    game_name: String,
    #[serde(default)]
    viewer_count: i64,
}

impl StreamsResponse {
    /// Helix reports an errored stream with an empty `type`; only `live`
    /// counts as live, and a response made only of errored entries is
    /// rejected rather than read as offline.
    fn into_status(self) -> Result<StreamStatus, ExternalApiError> {
        if !self.data.is_empty() && self.data.iter().all(|stream| stream.kind.is_empty()) {
            return Err(ExternalApiError::InvalidResponse {
                service: "twitch",
                reason: "stream entry reported with error type".to_string(),
            });
        }

        Ok(self
            .data
            .into_iter()
            .find(|stream| stream.kind == "live")
            .map(|stream| {
                StreamStatus::live(StreamInfo {
                    title: stream.title,
                    category: stream.game_name,
                    viewer_count: stream.viewer_count,
                })
            })
            .unwrap_or_else(StreamStatus::offline))
    }
}

pub struct TwitchClient {
    config: TwitchConfig,
    http_client: reqwest::Client,
    store: PublisherStore,
    token: Mutex<Option<AppToken>>,
}

impl TwitchClient {
    pub fn new(config: TwitchConfig, store: PublisherStore) -> Result<Self, ExternalApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
            store,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ExternalApiError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        if let Some(token) = self.load_stored_token().await.filter(|t| t.is_fresh(now)) {
            debug!("Using stored Twitch app token");
            let access_token = token.access_token.clone();
            *cached = Some(token);
            return Ok(access_token);
        }

        let token = self.request_token().await?;
        match serde_json::to_string(&token) {
            Ok(json) => {
                if let Err(e) = self.store.put_config(TOKEN_CONFIG_KEY, &json).await {
                    warn!(error = %e, "Failed to persist Twitch app token");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode Twitch app token"),
        }

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn load_stored_token(&self) -> Option<AppToken> {
        match self.store.get_config(TOKEN_CONFIG_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json)
                .map_err(|e| warn!(error = %e, "Discarding unreadable stored Twitch token"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored Twitch token");
                None
            }
        }
    }

    async fn request_token(&self) -> Result<AppToken, ExternalApiError> {
        let response = self
            .http_client
            .post(format!("{}/token", self.config.auth_base))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalApiError::Status {
                service: "twitch-auth",
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = chrono::Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| ExternalApiError::InvalidResponse {
                service: "twitch-auth",
                reason: format!("expires_in out of range: {}", token.expires_in),
            })?;
        info!(expires_in = token.expires_in, "Obtained Twitch app access token");
        Ok(AppToken {
            access_token: token.access_token,
            expires_at,
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
        if let Err(e) = self.store.delete_config(TOKEN_CONFIG_KEY).await {
            warn!(error = %e, "Failed to clear stored Twitch token");
        }
    }
}

#[async_trait]
impl StreamStatusSource for TwitchClient {
    async fn get_status(&self, channel: &str) -> Result<StreamStatus, ExternalApiError> {
        let token = self.access_token().await?;

        let response = self
            .http_client
            .get(format!("{}/streams", self.config.api_base))
            .query(&[("user_login", channel)])
            .header("Client-Id", &self.config.client_id)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(%channel, "Twitch rejected app token, will request a new one");
            self.invalidate_token().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalApiError::Status {
                service: "twitch",
                status: status.as_u16(),
                body,
            });
        }

        let streams: StreamsResponse = response.json().await?;
        streams.into_status()
    }

    fn name(&self) -> &'static str {
        "twitch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> (TempDir, PublisherStore, TwitchClient) {
        let dir = TempDir::new().unwrap();
        let store = PublisherStore::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        let config = TwitchConfig {
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            api_base: server.uri(),
            auth_base: server.uri(),
            request_timeout: Duration::from_secs(5),
        };
        let client = TwitchClient::new(config, store.clone()).unwrap();
        (dir, store, client)
    }

    fn token_mock(expected_calls: u64) -> Mock {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "apptoken",
                "expires_in": 3600,
                "token_type": "bearer"
            })))
            .expect(expected_calls)
    }

    #[test]
    fn test_parse_live_stream() {
        let response: StreamsResponse = serde_json::from_value(json!({
            "data": [{
                "id": "1",
                "user_login": "somechannel",
                "type": "live",
                "title": "Speedruns",
                "game_name": "Celeste",
                "viewer_count": 42,
                "started_at": "2024-01-01T00:00:00Z"
            }],
            "pagination": {}
        }))
        .unwrap();

        let status = response.into_status().unwrap();
        assert!(status.is_live);
        assert_eq!(status.info.title, "Speedruns");
        assert_eq!(status.info.category, "Celeste");
        assert_eq!(status.info.viewer_count, 42);
    }

    #[test]
    fn test_parse_offline() {
        let response: StreamsResponse =
            serde_json::from_value(json!({ "data": [], "pagination": {} })).unwrap();
        assert_eq!(response.into_status().unwrap(), StreamStatus::offline());
    }

    #[test]
    fn test_parse_errored_stream() {
        let response: StreamsResponse = serde_json::from_value(json!({
            "data": [{ "type": "", "title": "", "game_name": "", "viewer_count": 0 }]
        }))
        .unwrap();
        assert!(matches!(
            response.into_status(),
            Err(ExternalApiError::InvalidResponse { service: "twitch", .. })
        ));

        let response: StreamsResponse = serde_json::from_value(json!({
            "data": [{ "type": "" }, { "type": "live", "title": "back up" }]
        }))
        .unwrap();
        let status = response.into_status().unwrap();
        assert!(status.is_live);
        assert_eq!(status.info.title, "back up");
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let expiring = AppToken {
            access_token: "t".into(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        let fresh = AppToken {
            access_token: "t".into(),
            expires_at: now + chrono::Duration::seconds(3600),
        };
        assert!(!expiring.is_fresh(now));
        assert!(fresh.is_fresh(now));

        let ancient = AppToken {
            access_token: "t".into(),
            expires_at: DateTime::<Utc>::MIN_UTC,
        };
        assert!(!ancient.is_fresh(now));
    }

    #[tokio::test]
    async fn test_out_of_range_token_lifetime_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "apptoken",
                "expires_in": 9_000_000_000_000_i64,
                "token_type": "bearer"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let (_dir, store, client) = client(&server).await;
        let client = std::sync::Arc::new(client);
        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.get_status("chan").await })
        };

        let err = task.await.expect("status query panicked").unwrap_err();
        assert!(matches!(
            err,
            ExternalApiError::InvalidResponse { service: "twitch-auth", .. }
        ));
        assert!(store.get_config(TOKEN_CONFIG_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_status_reuses_token() {
        let server = MockServer::start().await;
        token_mock(1).mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/streams"))
            .and(query_param("user_login", "somechannel"))
            .and(header("Client-Id", "cid"))
            .and(header("Authorization", "Bearer apptoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "type": "live", "title": "hi", "game_name": "Chess", "viewer_count": 5 }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let (_dir, store, client) = client(&server).await;
        assert!(client.get_status("somechannel").await.unwrap().is_live);
        assert!(client.get_status("somechannel").await.unwrap().is_live);
        assert!(store.get_config(TOKEN_CONFIG_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stored_token_survives_new_client() {
        let server = MockServer::start().await;
        token_mock(1).mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let (_dir, store, first) = client(&server).await;
        assert!(!first.get_status("chan").await.unwrap().is_live);

        let config = first.config.clone();
        let second = TwitchClient::new(config, store).unwrap();
        assert!(!second.get_status("chan").await.unwrap().is_live);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token() {
        let server = MockServer::start().await;
        token_mock(2).mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/streams"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let (_dir, store, client) = client(&server).await;
        let err = client.get_status("chan").await.unwrap_err();
        assert!(matches!(err, ExternalApiError::Status { status: 401, .. }));
        assert!(store.get_config(TOKEN_CONFIG_KEY).await.unwrap().is_none());

        // Next call has to fetch a fresh token.
        assert!(client.get_status("chan").await.is_err());
    }

    #[tokio::test]
    async fn test_token_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid client"))
            .mount(&server)
            .await;

        let (_dir, _store, client) = client(&server).await;
        let err = client.get_status("chan").await.unwrap_err();
        assert!(matches!(
            err,
            ExternalApiError::Status { service: "twitch-auth", status: 400, .. }
        ));
    }
}
