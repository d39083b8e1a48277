//! Stream-key authentication for RTMP publish and play requests
//!
//! The media server calls the webhook gateway when a session starts or
//! stops; the gateway hands the presented stream key to [`AuthValidator`].

use crate::error::{AppError, Result};
use crate::models::{Publisher, PublisherSummary};
use crate::store::{MarkLive, PublisherStore, StoreResult};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;

/// Random bytes per stream key (hex encoded to twice as many characters)
const STREAM_KEY_BYTES: usize = 24;
const MAX_KEY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownKey,
    /// Another session is already publishing with this key
    AlreadyLive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDecision {
    Allow,
}

/// Shortened key for logs
pub(crate) fn redact(stream_key: &str) -> String {
    let prefix: String = stream_key.chars().take(4).collect();
    format!("{prefix}…")
}

fn generate_stream_key() -> String {
    let mut bytes = [0u8; STREAM_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validates publish/play requests and owns the local RTMP live state
#[derive(Clone)]
pub struct AuthValidator {
    store: PublisherStore,
}

impl AuthValidator {
    pub fn new(store: PublisherStore) -> Self {
        Self { store }
    }

    /// Allow a publish session and mark the publisher live, unless the key is
    /// unknown or a session with the same key is already live.
    pub async fn validate_publish(&self, stream_key: &str) -> StoreResult<PublishDecision> {
        let decision = match self.store.try_mark_live(stream_key, Utc::now()).await? {
            MarkLive::Marked(publisher_id) => {
                info!(stream_key = %redact(stream_key), %publisher_id, "RTMP publish authorized");
                PublishDecision::Allow
            }
            MarkLive::AlreadyLive(publisher_id) => {
                warn!(
                    stream_key = %redact(stream_key),
                    %publisher_id,
                    "RTMP publish rejected: stream key already live"
                );
                PublishDecision::Deny(DenyReason::AlreadyLive)
            }
            MarkLive::UnknownKey => {
                warn!(stream_key = %redact(stream_key), "RTMP publish rejected: stream key not found");
                PublishDecision::Deny(DenyReason::UnknownKey)
            }
        };
        Ok(decision)
    }

    /// Mark the key's publisher offline. Idempotent.
    pub async fn end_publish(&self, stream_key: &str) -> StoreResult<()> {
        match self.store.mark_offline(stream_key, Utc::now()).await? {
            Some(publisher_id) => {
                info!(stream_key = %redact(stream_key), %publisher_id, "RTMP publish ended");
            }
            None => {
                warn!(stream_key = %redact(stream_key), "RTMP publish done received for unknown stream key");
            }
        }
        Ok(())
    }

    /// Playback is not restricted; this is where a play-side check would go.
    pub fn validate_play(&self, stream_key: &str) -> PlayDecision {
        info!(stream_key = %redact(stream_key), "RTMP play allowed");
        PlayDecision::Allow
    }

    /// Register a publisher with a fresh random stream key
    pub async fn create_publisher(&self) -> Result<Publisher> {
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let publisher = Publisher {
                id: Uuid::new_v4(),
                stream_key: generate_stream_key(),
                created_at: Utc::now(),
            };

            if self.store.insert_publisher(&publisher).await? {
                info!(publisher_id = %publisher.id, "Publisher created");
                return Ok(publisher);
            }
            warn!(attempt, "Stream key collision, regenerating");
        }

        Err(AppError::Internal(format!(
            "could not allocate a unique stream key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    /// Delete a publisher with its live state and channel binding
    pub async fn revoke_publisher(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_publisher(id).await? {
            return Err(AppError::NotFound(format!("publisher {id}")));
        }
        info!(publisher_id = %id, "Publisher revoked");
        Ok(())
    }

    pub async fn list_publishers(&self) -> Result<Vec<PublisherSummary>> {
        Ok(self.store.list_publishers().await?)
    }

    pub async fn publisher(&self, id: Uuid) -> Result<PublisherSummary> {
        self.store
            .publisher_summary(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("publisher {id}")))
    }

    /// Bind a publisher to an external channel, replacing any previous binding
    pub async fn bind_channel(&self, id: Uuid, channel: &str) -> Result<PublisherSummary> {
        if !self.store.bind_channel(id, channel).await? {
            return Err(AppError::NotFound(format!("publisher {id}")));
        }
        info!(publisher_id = %id, %channel, "Channel bound");
        self.publisher(id).await
    }

    pub async fn unbind_channel(&self, id: Uuid) -> Result<PublisherSummary> {
        let summary = self.publisher(id).await?;
        if self.store.unbind_channel(id).await? {
            info!(publisher_id = %id, "Channel unbound");
        }
        Ok(PublisherSummary {
            channel: None,
            ..summary
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn validator() -> (TempDir, PublisherStore, AuthValidator) {
        let dir = TempDir::new().unwrap();
        let store = PublisherStore::open(&StoreConfig::in_dir(dir.path())).await.unwrap();
        let validator = AuthValidator::new(store.clone());
        (dir, store, validator)
    }

    #[test]
    fn test_generated_keys_are_hex() {
        let key = generate_stream_key();
        assert_eq!(key.len(), STREAM_KEY_BYTES * 2);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_redact_keeps_prefix_only() {
        assert_eq!(redact("abcdef123456"), "abcd…");
        assert_eq!(redact("ab"), "ab…");
    }

    #[tokio::test]
    async fn test_created_keys_are_distinct() {
        let (_dir, _store, validator) = validator().await;
        let mut keys = HashSet::new();
        for _ in 0..25 {
            let publisher = validator.create_publisher().await.unwrap();
            assert!(keys.insert(publisher.stream_key));
        }
        assert_eq!(validator.list_publishers().await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn test_second_publish_denied_while_live() {
        let (_dir, _store, validator) = validator().await;
        let publisher = validator.create_publisher().await.unwrap();

        assert_eq!(
            validator.validate_publish(&publisher.stream_key).await.unwrap(),
            PublishDecision::Allow
        );
        assert_eq!(
            validator.validate_publish(&publisher.stream_key).await.unwrap(),
            PublishDecision::Deny(DenyReason::AlreadyLive)
        );

        validator.end_publish(&publisher.stream_key).await.unwrap();
        validator.end_publish(&publisher.stream_key).await.unwrap();
        assert_eq!(
            validator.validate_publish(&publisher.stream_key).await.unwrap(),
            PublishDecision::Allow
        );
    }

    #[tokio::test]
    async fn test_unknown_key_denied() {
        let (_dir, _store, validator) = validator().await;
        assert_eq!(
            validator.validate_publish("not-a-key").await.unwrap(),
            PublishDecision::Deny(DenyReason::UnknownKey)
        );
        validator.end_publish("not-a-key").await.unwrap();
    }

    #[tokio::test]
    async fn test_play_is_pass_through() {
        let (_dir, _store, validator) = validator().await;
        assert_eq!(validator.validate_play("anything"), PlayDecision::Allow);
    }

    #[tokio::test]
    async fn test_revoke_removes_publisher() {
        let (_dir, store, validator) = validator().await;
        let publisher = validator.create_publisher().await.unwrap();
        validator.bind_channel(publisher.id, "somechannel").await.unwrap();

        validator.revoke_publisher(publisher.id).await.unwrap();

        assert!(store.get_publisher(publisher.id).await.unwrap().is_none());
        assert!(store.bound_channels().await.unwrap().is_empty());
        assert_eq!(
            validator.validate_publish(&publisher.stream_key).await.unwrap(),
            PublishDecision::Deny(DenyReason::UnknownKey)
        );
        assert!(matches!(
            validator.revoke_publisher(publisher.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_unknown_publisher_not_found() {
        let (_dir, _store, validator) = validator().await;
        assert!(matches!(
            validator.bind_channel(Uuid::new_v4(), "chan").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unbind_clears_channel() {
        let (_dir, _store, validator) = validator().await;
        let publisher = validator.create_publisher().await.unwrap();
        let bound = validator.bind_channel(publisher.id, "chan").await.unwrap();
        assert_eq!(bound.channel.as_deref(), Some("chan"));

        let unbound = validator.unbind_channel(publisher.id).await.unwrap();
        assert_eq!(unbound.channel, None);
        assert_eq!(validator.publisher(publisher.id).await.unwrap().channel, None);
    }
}
