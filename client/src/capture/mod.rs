pub mod crop;

use chrono::{SecondsFormat, TimeZone, Utc};
use image::RgbImage;
use runcatcher_common::capture::{encode_data_uri, CaptureRequest};
use runcatcher_common::config::ClientConfig;
use runcatcher_common::frame::FaceBox;
use tracing::{debug, error};

use crop::{encode_crop, CropRect};

/// A cropped face snapshot ready for upload. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub jpeg: Vec<u8>,
    /// px/s
    pub motion_speed: f64,
    pub captured_at_ms: i64,
    /// Display counter ("Runner #N"), not an identity key.
    pub sequence: u64,
    pub crop: CropRect,
}

impl CaptureEvent {
    pub fn data_uri(&self) -> String {
        encode_data_uri(&self.jpeg)
    }

    /// ISO-8601 form of `captured_at_ms`.
    pub fn timestamp(&self) -> String {
        Utc.timestamp_millis_opt(self.captured_at_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn to_request(&self) -> CaptureRequest {
        CaptureRequest {
            image: Some(self.data_uri()),
            motion_speed: Some(self.motion_speed),
            timestamp: Some(self.timestamp()),
        }
    }
}

/// Cooldown-gated crop-and-encode step.
///
/// Holds its own state so independent camera sessions never share a
/// cooldown window.
pub struct CapturePipeline {
    cooldown_ms: i64,
    padding: u32,
    jpeg_quality: u8,
    last_capture_ms: Option<i64>,
    capture_count: u64,
}

impl CapturePipeline {
    pub fn new(cooldown_ms: i64, padding: u32, jpeg_quality: u8) -> Self {
        Self {
            cooldown_ms,
            padding,
            jpeg_quality,
            last_capture_ms: None,
            capture_count: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.cooldown_ms, config.crop_padding, config.jpeg_quality)
    }

    pub fn capture_count(&self) -> u64 {
        self.capture_count
    }

    /// Take the capture slot if the cooldown has elapsed, returning the new
    /// display sequence number.
    fn claim_slot(&mut self, now_ms: i64) -> Option<u64> {
        if let Some(last) = self.last_capture_ms {
            if now_ms - last < self.cooldown_ms {
                debug!(since_last_ms = now_ms - last, cooldown_ms = self.cooldown_ms, "capture cooling down");
                return None;
            }
        }
        self.last_capture_ms = Some(now_ms);
        self.capture_count += 1;
        Some(self.capture_count)
    }

    /// Crop `face` out of `frame` and encode it, subject to the cooldown.
    ///
    /// The cooldown slot is taken before cropping: a failed encode still
    /// blocks further captures until the window passes. Failures are logged
    /// and dropped.
    pub fn maybe_capture(
        &mut self,
        frame: &RgbImage,
        face: &FaceBox,
        speed: f64,
        now_ms: i64,
    ) -> Option<CaptureEvent> {
        let sequence = self.claim_slot(now_ms)?;

        let Some(crop) = CropRect::around(face, self.padding, frame.width(), frame.height()) else {
            error!(?face, sequence, "face box lies outside the frame, capture dropped");
            return None;
        };

        match encode_crop(frame, crop, self.jpeg_quality) {
            Ok(jpeg) => Some(CaptureEvent {
                jpeg,
                motion_speed: speed,
                captured_at_ms: now_ms,
                sequence,
                crop,
            }),
            Err(e) => {
                error!(error = %e, sequence, "failed to encode capture, dropped");
                None
            }
        }
    }
}
