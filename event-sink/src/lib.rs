//! Downstream delivery of per-window unique counts. Delivery is
//! at-most-once: a failed publish is reported to the caller and the
//! sample is gone.

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sink rejected publish with status {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, unique: u64) -> Result<(), SinkError>;
}

/// Posts each window's count to a fixed URL. The client carries its
/// own bounded timeout so a stalled sink cannot hold up the flush
/// cadence past one tick.
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, unique: u64) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "unique": unique }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Fallback sink for local runs with no downstream configured.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, unique: u64) -> Result<(), SinkError> {
        info!("window unique count: {unique}");
        Ok(())
    }
}
