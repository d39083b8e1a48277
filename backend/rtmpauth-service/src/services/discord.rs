//! Discord webhook notification sink

use super::notifier::NotificationSink;
use crate::error::ExternalApiError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

pub struct DiscordSink {
    webhook_url: String,
    http_client: reqwest::Client,
}

impl DiscordSink {
    pub fn new(webhook_url: String) -> Result<Self, ExternalApiError> {
        let http_client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            webhook_url,
            http_client,
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, message: &str) -> Result<(), ExternalApiError> {
        let response = self
            .http_client
            .post(&self.webhook_url)
            .json(&WebhookMessage { content: message })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ExternalApiError::Status {
            service: "discord",
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webhooks/1/abc"))
            .and(body_json(serde_json::json!({ "content": "chan is now live" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = DiscordSink::new(format!("{}/api/webhooks/1/abc", server.uri())).unwrap();
        sink.send("chan is now live").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let sink = DiscordSink::new(server.uri()).unwrap();
        let err = sink.send("hello").await.unwrap_err();
        assert!(matches!(
            err,
            ExternalApiError::Status { service: "discord", status: 429, .. }
        ));
    }
}
