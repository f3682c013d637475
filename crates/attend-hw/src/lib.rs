//! attend-hw: camera session and frame capture.
//!
//! Provides the device lifecycle (`CameraSession`), a V4L2 backend and a
//! still-image backend, and JPEG encoding of captured frames.

pub mod backend;
pub mod camera;
pub mod frame;
pub mod session;
pub mod still;

pub use backend::{CameraBackend, CameraConstraints, CameraDevice, FacingMode};
pub use camera::{
    CameraError, DeviceInfo, PixelFormat, V4lBackend, V4lCamera, DEFAULT_WARMUP_FRAMES,
};
pub use frame::{CapturedFrame, EncodedImage};
pub use session::{CameraEvent, CameraSession, CameraStatus};
pub use still::StillImageBackend;
