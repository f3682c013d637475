//! Camera session: device lifecycle, readiness events and single-frame capture.

use crate::backend::{CameraBackend, CameraConstraints, CameraDevice};
use crate::camera::CameraError;
use crate::frame::CapturedFrame;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle state of a [`CameraSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Uninitialized,
    Ready,
    /// Terminal until the next `initialize`.
    Error,
}

/// Notifications published by a session to whoever holds the receiver.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    Ready { width: u32, height: u32 },
    Error(String),
    FrameCaptured(CapturedFrame),
}

/// Owns one camera device handle at a time.
///
/// The handle is released by [`teardown`](Self::teardown) or when the session
/// is dropped, whichever comes first.
pub struct CameraSession<B: CameraBackend> {
    backend: Arc<B>,
    constraints: CameraConstraints,
    status: CameraStatus,
    last_error: Option<String>,
    device: Option<B::Device>,
    events: mpsc::UnboundedSender<CameraEvent>,
}

impl<B: CameraBackend> CameraSession<B> {
    /// Create an uninitialized session and the receiving end of its event stream.
    pub fn new(backend: B) -> (Self, mpsc::UnboundedReceiver<CameraEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            backend: Arc::new(backend),
            constraints: CameraConstraints::default(),
            status: CameraStatus::Uninitialized,
            last_error: None,
            device: None,
            events: tx,
        };
        (session, rx)
    }

    pub fn status(&self) -> CameraStatus {
        self.status
    }

    pub fn constraints(&self) -> CameraConstraints {
        self.constraints
    }

    /// Why the session entered `Error`, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Acquire the device. Opening runs on the blocking pool.
    ///
    /// Any previously held handle is released first, so a session never owns two.
    pub async fn initialize(&mut self, constraints: CameraConstraints) -> Result<(), CameraError> {
        self.release_device();
        self.constraints = constraints;

        let backend = Arc::clone(&self.backend);
        let opened = tokio::task::spawn_blocking(move || backend.open(&constraints))
            .await
            .unwrap_or_else(|e| {
                Err(CameraError::CaptureFailed(format!(
                    "device open task failed: {e}"
                )))
            });

        match opened {
            Ok(device) => {
                let (width, height) = device.resolution();
                self.device = Some(device);
                self.status = CameraStatus::Ready;
                self.last_error = None;
                tracing::info!(
                    width,
                    height,
                    requested_width = constraints.width,
                    requested_height = constraints.height,
                    facing = %constraints.facing_mode,
                    "camera session ready"
                );
                self.emit(CameraEvent::Ready { width, height });
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Take a still from the live feed.
    ///
    /// Fails with [`CameraError::DeviceNotReady`] unless the session is `Ready`;
    /// callers should wait for a `Ready` event rather than retry.
    pub fn capture(&mut self) -> Result<CapturedFrame, CameraError> {
        if self.status != CameraStatus::Ready {
            return Err(CameraError::DeviceNotReady);
        }
        let device = self.device.as_mut().ok_or(CameraError::DeviceNotReady)?;

        match device.snapshot() {
            Ok(image) => {
                let frame = CapturedFrame::stamp(image);
                tracing::debug!(
                    bytes = frame.jpeg().len(),
                    width = frame.width(),
                    height = frame.height(),
                    "frame captured"
                );
                self.emit(CameraEvent::FrameCaptured(frame.clone()));
                Ok(frame)
            }
            Err(e) => {
                self.release_device();
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Release the device. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.release_device() {
            tracing::info!("camera session torn down");
        }
        self.status = CameraStatus::Uninitialized;
    }

    fn release_device(&mut self) -> bool {
        self.device.take().is_some()
    }

    fn fail(&mut self, err: &CameraError) {
        tracing::warn!(error = %err, "camera session entered error state");
        self.status = CameraStatus::Error;
        self.last_error = Some(err.to_string());
        self.emit(CameraEvent::Error(err.to_string()));
    }

    fn emit(&self, event: CameraEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}

impl<B: CameraBackend> Drop for CameraSession<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EncodedImage;
    use crate::still::StillImageBackend;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts live handles so leaks are observable.
    struct CountingBackend {
        live: Arc<AtomicUsize>,
        fail_open: bool,
    }

    struct CountingDevice {
        live: Arc<AtomicUsize>,
        fail_snapshot: bool,
    }

    impl CameraBackend for CountingBackend {
        type Device = CountingDevice;

        fn open(&self, _: &CameraConstraints) -> Result<CountingDevice, CameraError> {
            if self.fail_open {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(CountingDevice {
                live: Arc::clone(&self.live),
                fail_snapshot: false,
            })
        }
    }

    impl CameraDevice for CountingDevice {
        fn snapshot(&mut self) -> Result<EncodedImage, CameraError> {
            if self.fail_snapshot {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            Ok(EncodedImage {
                jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
                width: 1,
                height: 1,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (640, 480)
        }
    }

    impl Drop for CountingDevice {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn counting(fail_open: bool) -> (CountingBackend, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        (
            CountingBackend {
                live: Arc::clone(&live),
                fail_open,
            },
            live,
        )
    }

    #[test]
    fn test_capture_before_initialize_is_not_ready() {
        let (mut session, _rx) = CameraSession::new(StillImageBackend::from_image(RgbImage::new(4, 4)));
        assert_eq!(session.status(), CameraStatus::Uninitialized);
        assert!(matches!(session.capture(), Err(CameraError::DeviceNotReady)));
    }

    #[tokio::test]
    async fn test_initialize_emits_ready_and_capture_emits_frame() {
        let (mut session, mut rx) =
            CameraSession::new(StillImageBackend::from_image(RgbImage::new(8, 6)));
        session.initialize(CameraConstraints::default()).await.unwrap();
        assert_eq!(session.status(), CameraStatus::Ready);
        // Ready carries the delivered size, not the requested 1280x720.
        assert!(matches!(rx.recv().await, Some(CameraEvent::Ready { width: 8, height: 6 })));

        let frame = session.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        match rx.recv().await {
            Some(CameraEvent::FrameCaptured(published)) => assert_eq!(published, frame),
            other => panic!("expected FrameCaptured, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ready_reports_negotiated_resolution() {
        let (backend, _live) = counting(false);
        let (mut session, mut rx) = CameraSession::new(backend);
        session.initialize(CameraConstraints::default()).await.unwrap();
        assert!(matches!(rx.recv().await, Some(CameraEvent::Ready { width: 640, height: 480 })));
    }

    #[tokio::test]
    async fn test_denied_device_enters_error() {
        let (backend, live) = counting(true);
        let (mut session, mut rx) = CameraSession::new(backend);
        let result = session.initialize(CameraConstraints::default()).await;
        assert!(matches!(result, Err(CameraError::PermissionDenied(_))));
        assert_eq!(session.status(), CameraStatus::Error);
        assert!(session.last_error().unwrap().contains("permission denied"));
        assert!(matches!(rx.recv().await, Some(CameraEvent::Error(_))));
        assert!(matches!(session.capture(), Err(CameraError::DeviceNotReady)));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reinitialize_keeps_single_handle() {
        let (backend, live) = counting(false);
        let (mut session, _rx) = CameraSession::new(backend);
        session.initialize(CameraConstraints::default()).await.unwrap();
        session.initialize(CameraConstraints::default()).await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        session.teardown();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(session.status(), CameraStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let (backend, live) = counting(false);
        {
            let (mut session, _rx) = CameraSession::new(backend);
            session.initialize(CameraConstraints::default()).await.unwrap();
            assert_eq!(live.load(Ordering::SeqCst), 1);
        }
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_terminal() {
        let (backend, live) = counting(false);
        let (mut session, _rx) = CameraSession::new(backend);
        session.initialize(CameraConstraints::default()).await.unwrap();
        if let Some(device) = session.device.as_mut() {
            device.fail_snapshot = true;
        }
        assert!(matches!(session.capture(), Err(CameraError::CaptureFailed(_))));
        assert_eq!(session.status(), CameraStatus::Error);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(matches!(session.capture(), Err(CameraError::DeviceNotReady)));
    }
}
