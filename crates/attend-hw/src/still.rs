//! Still-image backend: serves a fixed picture as the "live feed".
//!
//! Used for scripted runs (`attend mark --image face.jpg`) and tests.

use crate::backend::{CameraBackend, CameraConstraints, CameraDevice};
use crate::camera::CameraError;
use crate::frame::{self, EncodedImage};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Image(Arc<RgbImage>),
}

/// Backend whose device always returns the same picture.
#[derive(Debug, Clone)]
pub struct StillImageBackend {
    source: Source,
}

impl StillImageBackend {
    /// Read the picture from disk each time the device is opened.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            source: Source::File(path.as_ref().to_path_buf()),
        }
    }

    /// Serve an in-memory image.
    pub fn from_image(image: RgbImage) -> Self {
        Self {
            source: Source::Image(Arc::new(image)),
        }
    }
}

impl CameraBackend for StillImageBackend {
    type Device = StillImageDevice;

    fn open(&self, constraints: &CameraConstraints) -> Result<StillImageDevice, CameraError> {
        let image = match &self.source {
            Source::File(path) => {
                if !path.exists() {
                    return Err(CameraError::DeviceNotFound(path.display().to_string()));
                }
                let img = image::open(path)
                    .map_err(|e| CameraError::Image(format!("{}: {e}", path.display())))?;
                Arc::new(img.to_rgb8())
            }
            Source::Image(img) => Arc::clone(img),
        };

        tracing::info!(
            width = image.width(),
            height = image.height(),
            facing = %constraints.facing_mode,
            "opened still-image camera"
        );

        Ok(StillImageDevice { image })
    }
}

/// Live handle for [`StillImageBackend`].
pub struct StillImageDevice {
    image: Arc<RgbImage>,
}

impl CameraDevice for StillImageDevice {
    fn snapshot(&mut self) -> Result<EncodedImage, CameraError> {
        let jpeg = frame::encode_jpeg(&self.image).map_err(|e| CameraError::Image(e.to_string()))?;
        Ok(EncodedImage {
            jpeg,
            width: self.image.width(),
            height: self.image.height(),
        })
    }

    fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_device_not_found() {
        let backend = StillImageBackend::from_path("/nonexistent/attend/face.jpg");
        let result = backend.open(&CameraConstraints::default());
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_snapshot_reports_image_size() {
        let backend = StillImageBackend::from_image(RgbImage::new(16, 12));
        let mut device = backend.open(&CameraConstraints::default()).unwrap();
        let still = device.snapshot().unwrap();
        assert_eq!((still.width, still.height), (16, 12));
        assert_eq!(&still.jpeg[..2], &[0xFF, 0xD8]);
    }
}
