#![allow(dead_code)]

use async_trait::async_trait;
use rtmpauth_service::error::ExternalApiError;
use rtmpauth_service::models::StreamStatus;
use rtmpauth_service::services::{NotificationSink, StreamStatusSource};
use rtmpauth_service::store::{PublisherStore, StoreConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub async fn open_store(dir: &Path) -> PublisherStore {
    PublisherStore::open(&StoreConfig::in_dir(dir))
        .await
        .expect("open store")
}

pub async fn temp_store() -> (TempDir, PublisherStore) {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(dir.path()).await;
    (dir, store)
}

#[derive(Clone)]
pub enum FakeResponse {
    Status(StreamStatus),
    Error,
    Delay(Duration),
}

/// Status source answering from a per-channel table; unknown channels are offline
#[derive(Default)]
pub struct FakeSource {
    responses: Mutex<HashMap<String, FakeResponse>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn set(&self, channel: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(channel.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamStatusSource for FakeSource {
    async fn get_status(&self, channel: &str) -> Result<StreamStatus, ExternalApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.responses.lock().unwrap().get(channel).cloned();
        match response {
            Some(FakeResponse::Status(status)) => Ok(status),
            Some(FakeResponse::Error) => Err(ExternalApiError::Status {
                service: "fake",
                status: 503,
                body: "unavailable".into(),
            }),
            Some(FakeResponse::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(StreamStatus::offline())
            }
            None => Ok(StreamStatus::offline()),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Sink that records every delivery attempt
#[derive(Default)]
pub struct RecordingSink {
    pub fail: AtomicBool,
    attempts: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &str) -> Result<(), ExternalApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExternalApiError::Status {
                service: "recording",
                status: 500,
                body: "sink down".into(),
            });
        }
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
