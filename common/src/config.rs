use serde::Deserialize;
use std::path::Path;

/// Motion threshold carried over from the browser prototype, in px/s.
///
/// Suspect: at typical webcam frame rates almost any detector jitter exceeds
/// it. Recalibrate against real measurements before relying on it.
pub const LEGACY_MOTION_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_captures_dir")]
    pub captures_dir: String,
    /// Blanket request body cap shared by every route.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Optional web root served for every path no API route claims.
    #[serde(default)]
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Speed above which a face counts as running, in px/s.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,
    /// Pixels added on every side of the face box before cropping.
    #[serde(default = "default_crop_padding")]
    pub crop_padding: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_url")]
    pub url: String,
    /// `polling` fetches one snapshot per cycle, `mjpeg` reads a multipart stream.
    #[serde(default = "default_camera_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Snapshot request timeout in polling mode; longest gap between stream
    /// chunks in mjpeg mode.
    #[serde(default = "default_camera_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url")]
    pub url: String,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            captures_dir: default_captures_dir(),
            body_limit_bytes: default_body_limit(),
            static_dir: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            motion_threshold: default_motion_threshold(),
            cooldown_ms: default_cooldown_ms(),
            crop_padding: default_crop_padding(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: default_camera_url(),
            mode: default_camera_mode(),
            fps: default_fps(),
            timeout_ms: default_camera_timeout_ms(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: default_detector_url(),
            timeout_ms: default_detector_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `PORT` and `CAPTURES_DIR` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var("PORT").ok(),
            std::env::var("CAPTURES_DIR").ok(),
        )
    }

    pub fn apply_overrides(
        &mut self,
        port: Option<String>,
        captures_dir: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = port.filter(|p| !p.trim().is_empty()) {
            self.server.port = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env("PORT", raw.clone()))?;
        }
        if let Some(dir) = captures_dir.filter(|d| !d.trim().is_empty()) {
            self.server.captures_dir = dir;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value for environment variable {0}: {1:?}")]
    Env(&'static str, String),
}

fn default_port() -> u16 {
    3000
}
fn default_captures_dir() -> String {
    "captures".into()
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}
fn default_server_url() -> String {
    "http://localhost:3000".into()
}
fn default_motion_threshold() -> f64 {
    LEGACY_MOTION_THRESHOLD
}
fn default_cooldown_ms() -> i64 {
    2000
}
fn default_crop_padding() -> u32 {
    50
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_camera_url() -> String {
    "http://localhost:8080/frame".into()
}
fn default_camera_mode() -> String {
    "polling".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_camera_timeout_ms() -> u64 {
    10_000
}
fn default_detector_url() -> String {
    "http://localhost:8500/detect".into()
}
fn default_detector_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".into()
}
