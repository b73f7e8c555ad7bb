use log::debug;
use std::future::Future;
use std::time::Duration;

use crate::location::LocationSample;

use super::error::SendError;
use super::payload::LocationPayload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSuccess {
    pub status_code: u16,
    pub response_body: String,
}

/// One-shot delivery of a location sample. The coordinator depends on
/// this trait so tests can substitute a recording double.
pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        destination: &str,
        bearer_token: Option<&str>,
        sample: Option<&LocationSample>,
    ) -> impl Future<Output = Result<SendSuccess, SendError>> + Send;
}

/// Stateless reqwest-backed uploader: exactly one POST per call, no
/// retries. Retry policy, if any, belongs to the caller.
pub struct LocationUploader {
    client: reqwest::Client,
}

impl LocationUploader {
    pub fn new() -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(LocationUploader { client })
    }
}

impl Uploader for LocationUploader {
    async fn upload(
        &self,
        destination: &str,
        bearer_token: Option<&str>,
        sample: Option<&LocationSample>,
    ) -> Result<SendSuccess, SendError> {
        // Preconditions, checked before any I/O.
        let url = reqwest::Url::parse(destination).map_err(|_| SendError::InvalidDestination)?;
        let token = bearer_token
            .filter(|t| !t.is_empty())
            .ok_or(SendError::NotAuthenticated)?;
        let sample = sample.ok_or(SendError::NoSampleAvailable)?;

        debug!("uploading sample from {} to {}", sample.timestamp, url);

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&LocationPayload::from(sample))
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status_code) {
            Ok(SendSuccess {
                status_code,
                response_body: body,
            })
        } else {
            Err(SendError::Http { status_code, body })
        }
    }
}
