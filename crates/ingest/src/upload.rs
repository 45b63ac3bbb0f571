use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use payclaim_core::NewIngestedRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Store rejected record (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Transport(e.to_string())
    }
}

/// Sends one ingested-record document to the record store.
pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        record: &NewIngestedRecord,
    ) -> impl Future<Output = Result<(), UploadError>> + Send;
}

// ── HTTP backend ──────────────────────────────────────────────────────────────

/// Posts records to a payclaim server's `/api/notifications` endpoint.
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.into() }
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, record: &NewIngestedRecord) -> Result<(), UploadError> {
        let url = format!("{}/api/notifications", self.base_url.trim_end_matches('/'));
        let response = self.client.post(url).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            status: status.as_u16(),
            message: if message.is_empty() { status.to_string() } else { message },
        })
    }
}

// ── Mock backend (tests) ──────────────────────────────────────────────────────

/// Records what it was sent; fails the first `failures` attempts.
pub struct MockUploader {
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    sent: Mutex<Vec<NewIngestedRecord>>,
}

impl MockUploader {
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<NewIngestedRecord> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Uploader for MockUploader {
    async fn upload(&self, record: &NewIngestedRecord) -> Result<(), UploadError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(UploadError::Transport(
                "Network timeout connecting to record store".to_string(),
            ));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(record.clone());
        }
        Ok(())
    }
}
