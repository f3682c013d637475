use attend_hw::{CameraConstraints, FacingMode, DEFAULT_WARMUP_FRAMES};
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration, loaded from environment variables.
pub struct Config {
    /// Recognition API root (default: http://localhost:5000/api).
    pub api_url: String,
    /// V4L2 device for the user-facing camera (default: /dev/video0).
    pub camera_device: String,
    /// Optional V4L2 device for the environment-facing camera.
    pub camera_env_device: Option<String>,
    /// Requested capture width in pixels.
    pub capture_width: u32,
    /// Requested capture height in pixels.
    pub capture_height: u32,
    pub facing_mode: FacingMode,
    /// Frames dropped after the stream starts (auto-exposure settling).
    pub warmup_frames: usize,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Directory CSV exports are written to.
    pub export_dir: PathBuf,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let facing_mode = match std::env::var("ATTEND_FACING_MODE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring ATTEND_FACING_MODE");
                FacingMode::User
            }),
            Err(_) => FacingMode::User,
        };

        Self {
            api_url: std::env::var("ATTEND_API_URL")
                .unwrap_or_else(|_| attend_core::api::DEFAULT_BASE_URL.to_string()),
            camera_device: std::env::var("ATTEND_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_env_device: std::env::var("ATTEND_CAMERA_ENV_DEVICE").ok(),
            capture_width: env_u32("ATTEND_CAPTURE_WIDTH", 1280),
            capture_height: env_u32("ATTEND_CAPTURE_HEIGHT", 720),
            facing_mode,
            warmup_frames: env_usize("ATTEND_WARMUP_FRAMES", DEFAULT_WARMUP_FRAMES),
            request_timeout_secs: env_u64("ATTEND_REQUEST_TIMEOUT_SECS", 30),
            export_dir: std::env::var("ATTEND_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn constraints(&self) -> CameraConstraints {
        CameraConstraints {
            width: self.capture_width,
            height: self.capture_height,
            facing_mode: self.facing_mode,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
