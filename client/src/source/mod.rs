pub mod mjpeg;

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use image::RgbImage;
use runcatcher_common::config::CameraConfig;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use mjpeg::MjpegParser;

/// One decoded camera frame.
pub struct Frame {
    pub image: RgbImage,
    /// The JPEG the frame was decoded from, forwarded as-is to the detector.
    pub jpeg: Bytes,
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn decode(jpeg: Bytes, captured_at_ms: i64) -> Result<Self, SourceError> {
        let image = image::load_from_memory(&jpeg)?.to_rgb8();
        Ok(Self {
            image,
            jpeg,
            captured_at_ms,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("camera connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("camera stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to decode camera frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("camera stream ended")]
    Ended,
    #[error("camera stream stalled: no data for {0:?}")]
    Stalled(Duration),
    #[error("unknown camera mode {0:?}, expected 'polling' or 'mjpeg'")]
    UnknownMode(String),
}

impl SourceError {
    /// A bad frame can be skipped; anything else means the camera is gone.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, SourceError::Decode(_))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

pub enum CameraSource {
    /// GET one snapshot per cycle, paced to the configured fps.
    Polling {
        client: reqwest::Client,
        url: String,
        ticker: Interval,
        timeout: Duration,
    },
    /// A single long-lived `multipart/x-mixed-replace` response.
    Mjpeg {
        stream: ByteStream,
        parser: MjpegParser,
        stall_timeout: Duration,
    },
}

impl CameraSource {
    /// Open the camera. Any failure here is fatal for the client: there is
    /// no fallback source and no reconnect.
    pub async fn connect(config: &CameraConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(SourceError::HttpConnect)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(1));

        match config.mode.as_str() {
            "polling" => {
                // Probe once so a dead camera fails at startup.
                fetch_snapshot(&client, &config.url, timeout).await?;
                let period = Duration::from_secs_f64(1.0 / config.fps.max(0.1));
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(url = config.url, fps = config.fps, "polling camera snapshots");
                Ok(CameraSource::Polling {
                    client,
                    url: config.url.clone(),
                    ticker,
                    timeout,
                })
            }
            "mjpeg" => {
                // Only the headers are bounded here; the body is a stream.
                let response = tokio::time::timeout(timeout, client.get(&config.url).send())
                    .await
                    .map_err(|_| SourceError::Stalled(timeout))?
                    .map_err(SourceError::HttpConnect)?;
                if !response.status().is_success() {
                    return Err(SourceError::HttpStatus(response.status().as_u16()));
                }
                let parser = MjpegParser::from_content_type(
                    response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok()),
                );
                info!(url = config.url, status = %response.status(), "connected to MJPEG stream");
                Ok(CameraSource::Mjpeg {
                    stream: Box::pin(response.bytes_stream()),
                    parser,
                    stall_timeout: timeout,
                })
            }
            other => Err(SourceError::UnknownMode(other.to_string())),
        }
    }

    /// Wait for and decode the next frame.
    pub async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        match self {
            CameraSource::Polling {
                client,
                url,
                ticker,
                timeout,
            } => {
                ticker.tick().await;
                let jpeg = fetch_snapshot(client, url, *timeout).await?;
                Frame::decode(jpeg, Utc::now().timestamp_millis())
            }
            CameraSource::Mjpeg {
                stream,
                parser,
                stall_timeout,
            } => loop {
                if let Some(jpeg) = parser.next_frame() {
                    debug!(size = jpeg.len(), "MJPEG frame received");
                    return Frame::decode(jpeg, Utc::now().timestamp_millis());
                }
                let chunk = tokio::time::timeout(*stall_timeout, stream.next())
                    .await
                    .map_err(|_| SourceError::Stalled(*stall_timeout))?;
                match chunk {
                    Some(chunk) => parser.push(&chunk.map_err(SourceError::HttpStream)?),
                    None => return Err(SourceError::Ended),
                }
            },
        }
    }
}

async fn fetch_snapshot(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Bytes, SourceError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(SourceError::HttpConnect)?;
    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }
    response.bytes().await.map_err(SourceError::HttpStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 200, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    fn camera(url: String, mode: &str) -> CameraConfig {
        CameraConfig {
            url,
            mode: mode.into(),
            fps: 50.0,
            timeout_ms: 300,
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Frame::decode(Bytes::from_static(b"not a jpeg"), 0).err().unwrap();
        assert!(err.is_frame_local());
    }

    #[tokio::test]
    async fn polling_source_decodes_snapshots() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/frame"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg(64, 48)))
            .mount(&server)
            .await;

        let mut source = CameraSource::connect(&camera(format!("{}/frame", server.uri()), "polling"))
            .await
            .unwrap();
        let frame = source.next_frame().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert!(frame.captured_at_ms > 0);
    }

    #[tokio::test]
    async fn mjpeg_source_splits_stream() {
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--cam\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend(jpeg(32, 16));
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--cam--\r\n");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "multipart/x-mixed-replace; boundary=cam"),
            )
            .mount(&server)
            .await;

        let mut source = CameraSource::connect(&camera(format!("{}/stream", server.uri()), "mjpeg"))
            .await
            .unwrap();
        for _ in 0..2 {
            let frame = source.next_frame().await.unwrap();
            assert_eq!((frame.width(), frame.height()), (32, 16));
        }
        assert!(matches!(source.next_frame().await, Err(SourceError::Ended)));
    }

    #[tokio::test]
    async fn unreachable_camera_fails_at_connect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = CameraSource::connect(&camera(format!("{}/frame", server.uri()), "polling")).await;
        assert!(matches!(result, Err(SourceError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn hung_snapshot_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg(8, 8)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(jpeg(8, 8))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let mut source = CameraSource::connect(&camera(format!("{}/frame", server.uri()), "polling"))
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), source.next_frame())
            .await
            .expect("snapshot request was not bounded");
        let err = result.err().unwrap();
        assert!(!err.is_frame_local());
    }

    #[tokio::test]
    async fn silent_mjpeg_stream_is_reported_as_stalled() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = jpeg(16, 16);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut head).await;
            let mut out = Vec::new();
            out.extend_from_slice(
                b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=cam\r\nConnection: close\r\n\r\n",
            );
            out.extend_from_slice(b"--cam\r\nContent-Type: image/jpeg\r\n\r\n");
            out.extend(frame);
            out.extend_from_slice(b"\r\n--cam\r\n");
            socket.write_all(&out).await.unwrap();
            // Keep the connection open without sending anything else.
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut source = CameraSource::connect(&camera(format!("http://{addr}/stream"), "mjpeg"))
            .await
            .unwrap();
        assert!(source.next_frame().await.is_ok());
        let result = tokio::time::timeout(Duration::from_secs(5), source.next_frame())
            .await
            .expect("stalled stream was not bounded");
        assert!(matches!(result, Err(SourceError::Stalled(_))));
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let result = CameraSource::connect(&camera("http://127.0.0.1:9/x".into(), "v4l2")).await;
        assert!(matches!(result, Err(SourceError::UnknownMode(m)) if m == "v4l2"));
    }
}
