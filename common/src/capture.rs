use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix of the embedded-data string produced for JPEG captures.
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Body of `POST /capture`.
///
/// Every field is optional at the wire level; the server decides which
/// missing fields are an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_speed: Option<f64>,
    /// Client-side ISO-8601 timestamp. Logged only; the server names files
    /// after its own receipt time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl CaptureRequest {
    /// The image field, treating an empty string as absent.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
}

/// One row of `GET /captures`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEntry {
    pub filename: String,
    pub path: String,
    /// ISO-8601 creation time of the file.
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub captures_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Wrap JPEG bytes in a `data:image/jpeg;base64,` string.
pub fn encode_data_uri(jpeg: &[u8]) -> String {
    let mut out = String::with_capacity(JPEG_DATA_URI_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    out.push_str(JPEG_DATA_URI_PREFIX);
    STANDARD.encode_string(jpeg, &mut out);
    out
}

/// Decode an image payload back to raw bytes.
///
/// Only the fixed JPEG prefix is stripped. Anything else is decoded as bare
/// base64, so a PNG data URI fails here instead of being silently accepted.
pub fn decode_data_uri(data: &str) -> Result<Vec<u8>, CaptureError> {
    let payload = data.strip_prefix(JPEG_DATA_URI_PREFIX).unwrap_or(data);
    Ok(STANDARD.decode(payload.trim())?)
}
