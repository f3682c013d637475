//! V4L2 camera capture via the `v4l` crate.

use crate::backend::{CameraBackend, CameraConstraints, CameraDevice, FacingMode};
use crate::frame::{self, EncodedImage};
use image::RgbImage;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Frames discarded after streaming starts so auto-exposure can settle.
pub const DEFAULT_WARMUP_FRAMES: usize = 4;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera is not ready")]
    DeviceNotReady,
    #[error("image error: {0}")]
    Image(String),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG: each buffer is already a JPEG still.
    Mjpeg,
    /// YUYV 4:2:2 packed (2 bytes/pixel), converted to RGB and encoded here.
    Yuyv,
}

/// Opens V4L2 devices, choosing the node by facing mode.
#[derive(Debug, Clone)]
pub struct V4lBackend {
    user_device: String,
    environment_device: Option<String>,
    warmup_frames: usize,
}

impl V4lBackend {
    pub fn new(user_device: impl Into<String>, environment_device: Option<String>) -> Self {
        Self {
            user_device: user_device.into(),
            environment_device,
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    /// Number of frames to drop when a device is opened.
    pub fn with_warmup_frames(mut self, frames: usize) -> Self {
        self.warmup_frames = frames;
        self
    }

    pub fn warmup_frames(&self) -> usize {
        self.warmup_frames
    }

    /// Device node to open for the requested facing mode.
    pub fn device_for(&self, facing: FacingMode) -> &str {
        match (facing, &self.environment_device) {
            (FacingMode::Environment, Some(path)) => path,
            (FacingMode::Environment, None) => {
                tracing::warn!(
                    device = %self.user_device,
                    "no environment-facing camera configured; using user-facing device"
                );
                &self.user_device
            }
            (FacingMode::User, _) => &self.user_device,
        }
    }
}

impl CameraBackend for V4lBackend {
    type Device = V4lCamera;

    fn open(&self, constraints: &CameraConstraints) -> Result<V4lCamera, CameraError> {
        let mut camera = V4lCamera::open(self.device_for(constraints.facing_mode), constraints)?;
        camera.start_stream(self.warmup_frames)?;
        Ok(camera)
    }
}

/// V4L2 camera device handle.
///
/// After [`start_stream`](Self::start_stream) the driver keeps filling the
/// mapped buffers; snapshots dequeue from that running stream.
pub struct V4lCamera {
    // Declared before `device` so buffers are unmapped before the fd closes.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate a format.
    pub fn open(device_path: &str, constraints: &CameraConstraints) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(device_path.to_string())
            } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for MJPG at the requested size; accept YUYV if the driver falls back.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"MJPG");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let mut negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        if negotiated.fourcc != FourCC::new(b"MJPG") && negotiated.fourcc != FourCC::new(b"YUYV")
        {
            fmt.fourcc = FourCC::new(b"YUYV");
            negotiated = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
        }

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need MJPG or YUYV)"
            )));
        };

        if negotiated.width != constraints.width || negotiated.height != constraints.height {
            tracing::debug!(
                requested_width = constraints.width,
                requested_height = constraints.height,
                "driver adjusted capture resolution"
            );
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Negotiated pixel format.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Map buffers, start streaming, and throw away `warmup_frames` frames.
    ///
    /// Calling it again on a streaming camera is a no-op.
    pub fn start_stream(&mut self, warmup_frames: usize) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;

        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, device = %self.device_path, "discarding warmup frames");
            for _ in 0..warmup_frames {
                stream.next().map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to dequeue warmup buffer: {e}"))
                })?;
            }
        }

        self.stream = Some(stream);
        Ok(())
    }

    /// Turn a raw driver buffer into a JPEG still.
    fn encode_buffer(
        format: PixelFormat,
        width: u32,
        height: u32,
        device_path: &str,
        buf: &[u8],
    ) -> Result<EncodedImage, CameraError> {
        match format {
            PixelFormat::Mjpeg => {
                if buf.len() < 2 || buf[..2] != [0xFF, 0xD8] {
                    return Err(CameraError::CaptureFailed(
                        "MJPG buffer does not start with a JPEG marker".into(),
                    ));
                }
                Ok(EncodedImage {
                    jpeg: buf.to_vec(),
                    width,
                    height,
                })
            }
            PixelFormat::Yuyv => {
                if frame::is_dark_yuyv(buf, 0.95) {
                    tracing::warn!(device = %device_path, "captured frame is almost entirely dark");
                }
                let rgb = frame::yuyv_to_rgb(buf, width, height).map_err(|e| {
                    CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
                })?;
                let img = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
                    CameraError::Image("RGB buffer does not match frame size".into())
                })?;
                let jpeg = frame::encode_jpeg(&img).map_err(|e| CameraError::Image(e.to_string()))?;
                Ok(EncodedImage {
                    jpeg,
                    width,
                    height,
                })
            }
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraDevice for V4lCamera {
    fn snapshot(&mut self) -> Result<EncodedImage, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::DeviceNotReady)?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        tracing::debug!(seq = meta.sequence, bytes = used, "dequeued buffer");

        Self::encode_buffer(
            self.pixel_format,
            self.width,
            self.height,
            &self.device_path,
            &buf[..used],
        )
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
