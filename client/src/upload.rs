use std::time::Duration;

use runcatcher_common::capture::CaptureResponse;

use crate::capture::CaptureEvent;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("capture upload failed: {0}")]
    Http(reqwest::Error),
    #[error("capture server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected capture server response: {0}")]
    Response(reqwest::Error),
}

/// Sends captures to the capture service. One attempt per capture: a failed
/// upload loses the image.
pub struct CaptureUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl CaptureUploader {
    pub fn new(server_url: &str) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(UploadError::Client)?;
        Ok(Self {
            client,
            endpoint: format!("{}/capture", server_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn upload(&self, event: &CaptureEvent) -> Result<CaptureResponse, UploadError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&event.to_request())
            .send()
            .await
            .map_err(UploadError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(UploadError::Response)
    }
}
