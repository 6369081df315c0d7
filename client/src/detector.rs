use std::future::Future;
use std::time::Duration;

use runcatcher_common::config::DetectorConfig;
use runcatcher_common::frame::FaceBox;
use tracing::debug;

use crate::source::Frame;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to build detector client: {0}")]
    Client(reqwest::Error),
    #[error("detector unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("detector returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("detector response was not a list of boxes: {0}")]
    Response(reqwest::Error),
}

/// Black-box face detection: frame in, face boxes out.
pub trait FaceDetector {
    fn detect(&self, frame: &Frame) -> impl Future<Output = Result<Vec<FaceBox>, DetectError>> + Send;
}

/// Face detection delegated to an external model service.
///
/// The frame JPEG is POSTed as `image/jpeg`; the service answers with a JSON
/// array of `{x, y, width, height}` objects in frame pixels. Extra fields
/// (scores, landmarks) are ignored.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(DetectError::Client)?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check the model service is up. Any answer short of a server error
    /// counts: some services only accept POST on the detect route.
    pub async fn probe(&self) -> Result<(), DetectError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(DetectError::Unreachable)?;
        if response.status().is_server_error() {
            return Err(DetectError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

impl FaceDetector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>, DetectError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(frame.jpeg.clone())
            .send()
            .await
            .map_err(DetectError::Unreachable)?;

        if !response.status().is_success() {
            return Err(DetectError::HttpStatus(response.status().as_u16()));
        }

        let faces: Vec<FaceBox> = response.json().await.map_err(DetectError::Response)?;
        debug!(faces = faces.len(), ts = frame.captured_at_ms, "faces detected");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::RgbImage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame() -> Frame {
        Frame {
            image: RgbImage::new(8, 8),
            jpeg: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            captured_at_ms: 1,
        }
    }

    fn detector(server: &MockServer) -> HttpDetector {
        HttpDetector::new(&DetectorConfig {
            url: format!("{}/detect", server.uri()),
            timeout_ms: 2000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn parses_boxes_and_ignores_extra_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "x": 10.0, "y": 20.0, "width": 30.0, "height": 40.0, "score": 0.93 },
                { "x": 1.5, "y": 2.5, "width": 3.0, "height": 4.0, "landmarks": [[1, 2], [3, 4]] }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let faces = detector(&server).detect(&frame()).await.unwrap();
        assert_eq!(
            faces,
            vec![
                FaceBox::new(10.0, 20.0, 30.0, 40.0),
                FaceBox::new(1.5, 2.5, 3.0, 4.0)
            ]
        );
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = detector(&server).detect(&frame()).await.unwrap_err();
        assert!(matches!(err, DetectError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn probe_accepts_method_not_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        assert!(detector(&server).probe().await.is_ok());
    }

    #[tokio::test]
    async fn probe_fails_when_service_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(matches!(
            detector(&server).probe().await,
            Err(DetectError::HttpStatus(503))
        ));
    }
}
