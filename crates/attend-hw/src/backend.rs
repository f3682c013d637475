//! Device backend seam: capture constraints and the traits a camera driver implements.

use crate::camera::CameraError;
use crate::frame::EncodedImage;
use std::fmt;
use std::str::FromStr;

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Front camera, pointed at the operator.
    #[default]
    User,
    /// Rear / room camera.
    Environment,
}

impl FacingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(FacingMode::User),
            "environment" => Ok(FacingMode::Environment),
            other => Err(format!("unknown facing mode: {other}")),
        }
    }
}

/// Requested capture parameters. Backends negotiate the closest supported mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            facing_mode: FacingMode::User,
        }
    }
}

/// Acquires camera devices. `open` may block; the session runs it off the event loop.
pub trait CameraBackend: Send + Sync + 'static {
    type Device: CameraDevice;

    fn open(&self, constraints: &CameraConstraints) -> Result<Self::Device, CameraError>;
}

/// A live device handle. Dropping it releases the device.
pub trait CameraDevice: Send + 'static {
    /// Take one still from the live feed as JPEG.
    fn snapshot(&mut self) -> Result<EncodedImage, CameraError>;

    /// Frame size the device actually delivers, which may differ from the
    /// requested constraints.
    fn resolution(&self) -> (u32, u32);
}
