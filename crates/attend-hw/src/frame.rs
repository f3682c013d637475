//! Captured frame type and pixel helpers: YUYV conversion, dark detection, JPEG encoding.

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// JPEG quality used when a backend has to encode raw pixels itself.
pub const JPEG_QUALITY: u8 = 90;

/// An encoded still handed from a backend to the session.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An immutable JPEG still taken from the live feed.
///
/// Only [`CameraSession::capture`](crate::CameraSession::capture) creates these.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: DateTime<Local>,
}

impl CapturedFrame {
    pub(crate) fn stamp(image: EncodedImage) -> Self {
        Self {
            jpeg: image.jpeg,
            width: image.width,
            height: image.height,
            captured_at: Local::now(),
        }
    }

    /// Encoded JPEG bytes.
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Local wall-clock time the still was taken.
    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB8 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Check if a YUYV frame is dark by sampling its luma bytes.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_yuyv(yuyv: &[u8], threshold_pct: f32) -> bool {
    let mut total = 0usize;
    let mut dark = 0usize;
    for &y in yuyv.iter().step_by(2) {
        total += 1;
        if y < 32 {
            dark += 1;
        }
    }
    if total == 0 {
        return true;
    }
    (dark as f32 / total as f32) > threshold_pct
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(rgb: &RgbImage) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(rgb)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}
