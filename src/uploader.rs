//! Delivery of upload records to the collector.
//!
//! One record, one request. Nothing here retries: the next scheduler tick is
//! the next chance to deliver data.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::UploadRecord;

/// The collector signals "not stored" with this body even on HTTP 200.
const REFUSAL_BODY: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UploadMethod {
    /// Fields in the query string
    Get,
    /// Fields as an application/x-www-form-urlencoded body
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSuccess {
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadFailure {
    #[error("collector unreachable: {0}")]
    Unreachable(String),
    #[error("collector answered HTTP {status}")]
    Rejected { status: u16 },
    #[error("collector refused the record")]
    Refused,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn send(
        &self,
        record: &UploadRecord,
        endpoint: &str,
    ) -> Result<UploadSuccess, UploadFailure>;
}

pub struct HttpUploader {
    client: reqwest::Client,
    method: UploadMethod,
}

impl HttpUploader {
    pub fn new(method: UploadMethod, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("gpstracker-agent/{}", crate::GIT_TAG))
            .build()?;
        Ok(Self { client, method })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn send(
        &self,
        record: &UploadRecord,
        endpoint: &str,
    ) -> Result<UploadSuccess, UploadFailure> {
        let request = match self.method {
            UploadMethod::Get => self.client.get(endpoint).query(record),
            UploadMethod::Post => self.client.post(endpoint).form(record),
        };

        let response = request
            .send()
            .await
            .map_err(|err| UploadFailure::Unreachable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadFailure::Rejected {
                status: status.as_u16(),
            });
        }

        // The status already says "stored"; an unreadable body does not undo that.
        let body = response.text().await.unwrap_or_default();
        if body.trim() == REFUSAL_BODY {
            return Err(UploadFailure::Refused);
        }

        Ok(UploadSuccess {
            status: status.as_u16(),
        })
    }
}
