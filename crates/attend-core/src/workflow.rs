//! Capture → submit → result state machine shared by registration and attendance.
//!
//! ```text
//! Idle ──capture──▶ Capturing ──submit──▶ Submitting ──▶ Succeeded | Failed
//!  ▲                    │                                     │
//!  └──────── reset / retake ◀─────────────────────────────────┘
//! ```
//!
//! State lives in one owned [`WorkflowState`] value behind a lock that is never
//! held across an await, so a second `submit` issued while the first is in
//! flight observes `Submitting` and is turned away without touching the network.

use crate::api::{frame_data_url, ApiError, RecognitionApi};
use crate::types::{
    AttendanceEnvelope, AttendanceRequest, Envelope, MatchedStudent, RegisterRequest,
};
use attend_hw::{CameraBackend, CameraError, CameraEvent, CameraSession, CapturedFrame};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MSG_CAPTURED: &str = "Photo captured successfully!";
const MSG_CAMERA_NOT_READY: &str = "Camera is not ready.";
const MSG_CANCELLED: &str = "Request cancelled.";
const MSG_REGISTER_FALLBACK: &str = "Registration failed. Please try again.";
const MSG_ATTENDANCE_FALLBACK: &str = "Failed to mark attendance. Please try again.";
const MSG_REGISTERED: &str = "Student registered successfully!";
const MSG_ATTENDED: &str = "Attendance marked successfully!";

/// Which flow a workflow instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Enroll a new student; waits for an explicit submit after capture.
    Registration,
    /// Mark attendance; capture chains straight into submit.
    Attendance,
}

impl FlowKind {
    fn fallback_message(self) -> &'static str {
        match self {
            FlowKind::Registration => MSG_REGISTER_FALLBACK,
            FlowKind::Attendance => MSG_ATTENDANCE_FALLBACK,
        }
    }
}

/// Coarse phase of the state machine, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Submitting,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Capturing => "capturing",
            Phase::Submitting => "submitting",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

impl NoticeKind {
    pub fn label(self) -> &'static str {
        match self {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
        }
    }
}

/// User-facing message shown next to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}

/// Registration text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationForm {
    pub name: String,
    pub student_id: String,
}

impl RegistrationForm {
    pub fn new(name: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            student_id: student_id.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.student_id.trim().is_empty()
    }
}

/// A confirmed attendance mark.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceReceipt {
    pub student: Option<MatchedStudent>,
    pub message: String,
    /// Stamped by the client when the response arrived.
    pub marked_at: DateTime<Local>,
}

impl AttendanceReceipt {
    /// `"97.1% Match"` style label, when the server named a student.
    pub fn match_label(&self) -> Option<String> {
        self.student.as_ref().map(MatchedStudent::match_label)
    }
}

/// Payload of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Registered { message: String },
    Attended(AttendanceReceipt),
}

/// Full workflow state. The frame travels with the phases that may hold one.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    Capturing { frame: CapturedFrame },
    Submitting { frame: CapturedFrame },
    Succeeded { outcome: Outcome },
    /// Keeps the frame so the same capture can be resubmitted.
    Failed {
        message: String,
        frame: Option<CapturedFrame>,
    },
}

impl WorkflowState {
    pub fn phase(&self) -> Phase {
        match self {
            WorkflowState::Idle => Phase::Idle,
            WorkflowState::Capturing { .. } => Phase::Capturing,
            WorkflowState::Submitting { .. } => Phase::Submitting,
            WorkflowState::Succeeded { .. } => Phase::Succeeded,
            WorkflowState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn frame(&self) -> Option<&CapturedFrame> {
        match self {
            WorkflowState::Capturing { frame } | WorkflowState::Submitting { frame } => Some(frame),
            WorkflowState::Failed { frame, .. } => frame.as_ref(),
            WorkflowState::Idle | WorkflowState::Succeeded { .. } => None,
        }
    }

    /// Hold a new frame. Allowed from `Idle`, and from `Capturing` where it replaces the old one.
    fn hold(&mut self, frame: CapturedFrame) -> Result<(), WorkflowError> {
        match self.phase() {
            Phase::Idle | Phase::Capturing => {
                *self = WorkflowState::Capturing { frame };
                Ok(())
            }
            phase => Err(WorkflowError::InvalidTransition {
                action: "capture",
                phase,
            }),
        }
    }

    /// Enter `Submitting`, returning the frame to send.
    fn begin_submit(&mut self) -> Result<CapturedFrame, WorkflowError> {
        if self.phase() == Phase::Submitting {
            return Err(WorkflowError::Busy);
        }
        let frame = self.frame().cloned().ok_or(WorkflowError::MissingPhoto)?;
        *self = WorkflowState::Submitting {
            frame: frame.clone(),
        };
        Ok(frame)
    }

    /// Return to `Idle` from a finished or captured state, dropping any frame.
    fn reset(&mut self) -> Result<(), WorkflowError> {
        match self.phase() {
            Phase::Capturing | Phase::Succeeded | Phase::Failed => {
                *self = WorkflowState::Idle;
                Ok(())
            }
            Phase::Idle => Ok(()),
            Phase::Submitting => Err(WorkflowError::InvalidTransition {
                action: "reset",
                phase: Phase::Submitting,
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Please fill in all fields!")]
    MissingFields,
    #[error("Please capture a photo!")]
    MissingPhoto,
    #[error("Camera is not ready.")]
    CameraNotReady,
    #[error("camera error: {0}")]
    Camera(CameraError),
    #[error("a submission is already in progress")]
    Busy,
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
}

/// Read-only copy of everything a render surface needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowView {
    pub kind: FlowKind,
    pub phase: Phase,
    pub notice: Option<Notice>,
    pub form: RegistrationForm,
    pub camera_ready: bool,
    pub has_frame: bool,
    pub outcome: Option<Outcome>,
}

struct Inner {
    state: WorkflowState,
    form: RegistrationForm,
    notice: Option<Notice>,
    camera_ready: bool,
    /// Cancels the current (or next) submission. Re-armed after it fires.
    cancel: CancellationToken,
}

enum Payload {
    Register(RegisterRequest),
    Attend(AttendanceRequest),
}

enum Reply {
    Registered(Envelope),
    Attended(AttendanceEnvelope),
}

/// One registration or attendance attempt, driven by UI events.
pub struct CaptureWorkflow<A> {
    api: A,
    kind: FlowKind,
    inner: Mutex<Inner>,
}

impl<A: RecognitionApi> CaptureWorkflow<A> {
    pub fn new(api: A, kind: FlowKind) -> Self {
        Self {
            api,
            kind,
            inner: Mutex::new(Inner {
                state: WorkflowState::Idle,
                form: RegistrationForm::default(),
                notice: None,
                camera_ready: false,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn registration(api: A) -> Self {
        Self::new(api, FlowKind::Registration)
    }

    pub fn attendance(api: A) -> Self {
        Self::new(api, FlowKind::Attendance)
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn phase(&self) -> Phase {
        self.lock().state.phase()
    }

    pub fn state(&self) -> WorkflowState {
        self.lock().state.clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.lock().notice.clone()
    }

    pub fn view(&self) -> WorkflowView {
        let inner = self.lock();
        WorkflowView {
            kind: self.kind,
            phase: inner.state.phase(),
            notice: inner.notice.clone(),
            form: inner.form.clone(),
            camera_ready: inner.camera_ready,
            has_frame: inner.state.frame().is_some(),
            outcome: match &inner.state {
                WorkflowState::Succeeded { outcome } => Some(outcome.clone()),
                _ => None,
            },
        }
    }

    /// Replace the registration fields.
    pub fn set_form(&self, form: RegistrationForm) {
        self.lock().form = form;
    }

    /// Fold a camera session event into the readiness indicator.
    pub fn apply_camera_event(&self, event: &CameraEvent) {
        let mut inner = self.lock();
        match event {
            CameraEvent::Ready { width, height } => {
                tracing::debug!(width, height, "camera ready");
                inner.camera_ready = true;
            }
            CameraEvent::Error(reason) => {
                tracing::warn!(%reason, "camera unavailable");
                inner.camera_ready = false;
                inner.notice = Some(Notice::error(format!("{MSG_CAMERA_NOT_READY} {reason}")));
            }
            CameraEvent::FrameCaptured(frame) => {
                tracing::trace!(bytes = frame.jpeg().len(), "frame event");
            }
        }
    }

    /// Apply every event already queued on the session's channel.
    pub fn drain_camera_events(&self, events: &mut mpsc::UnboundedReceiver<CameraEvent>) {
        while let Ok(event) = events.try_recv() {
            self.apply_camera_event(&event);
        }
    }

    /// Take a still from the camera and hold it.
    ///
    /// A camera that is not ready leaves the state untouched and posts a
    /// recoverable error notice.
    pub fn request_capture<B: CameraBackend>(
        &self,
        camera: &mut CameraSession<B>,
    ) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        let phase = inner.state.phase();
        if !matches!(phase, Phase::Idle | Phase::Capturing) {
            return Err(WorkflowError::InvalidTransition {
                action: "capture",
                phase,
            });
        }

        match camera.capture() {
            Ok(frame) => {
                inner.camera_ready = true;
                inner.state.hold(frame)?;
                inner.notice = match self.kind {
                    FlowKind::Registration => Some(Notice::success(MSG_CAPTURED)),
                    FlowKind::Attendance => None,
                };
                Ok(())
            }
            Err(CameraError::DeviceNotReady) => {
                inner.camera_ready = false;
                inner.notice = Some(Notice::error(MSG_CAMERA_NOT_READY));
                Err(WorkflowError::CameraNotReady)
            }
            Err(e) => {
                inner.camera_ready = false;
                inner.notice = Some(Notice::error(format!("Camera error: {e}")));
                Err(WorkflowError::Camera(e))
            }
        }
    }

    /// Capture, then submit immediately for the attendance flow.
    ///
    /// Registration stops after the capture and reports `Capturing`.
    pub async fn capture_and_submit<B: CameraBackend>(
        &self,
        camera: &mut CameraSession<B>,
    ) -> Result<Phase, WorkflowError> {
        self.request_capture(camera)?;
        match self.kind {
            FlowKind::Registration => Ok(Phase::Capturing),
            FlowKind::Attendance => self.submit().await,
        }
    }

    /// Send the held frame (and registration fields) to the backend.
    ///
    /// Validation failures and a submission already in flight return an error
    /// without a network call. Server and transport failures are not errors
    /// here: they land the workflow in `Failed` and return `Ok(Phase::Failed)`.
    pub async fn submit(&self) -> Result<Phase, WorkflowError> {
        let (payload, cancel) = {
            let mut inner = self.lock();
            if inner.state.phase() == Phase::Submitting {
                tracing::debug!("submit ignored: already submitting");
                return Err(WorkflowError::Busy);
            }
            if self.kind == FlowKind::Registration && !inner.form.is_complete() {
                inner.notice = Some(Notice::error(WorkflowError::MissingFields.to_string()));
                return Err(WorkflowError::MissingFields);
            }
            let frame = match inner.state.begin_submit() {
                Ok(frame) => frame,
                Err(e) => {
                    inner.notice = Some(Notice::error(e.to_string()));
                    return Err(e);
                }
            };
            inner.notice = None;
            let image = frame_data_url(&frame);
            let payload = match self.kind {
                FlowKind::Registration => Payload::Register(RegisterRequest {
                    name: inner.form.name.trim().to_string(),
                    student_id: inner.form.student_id.trim().to_string(),
                    image,
                }),
                FlowKind::Attendance => Payload::Attend(AttendanceRequest { image }),
            };
            (payload, inner.cancel.clone())
        };

        tracing::info!(flow = ?self.kind, "submitting capture");
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            reply = self.call(&payload) => Some(reply),
        };

        let mut inner = self.lock();
        if reply.is_none() {
            inner.cancel = CancellationToken::new();
        }
        let phase = self.finish(&mut inner, reply);
        tracing::info!(flow = ?self.kind, %phase, "submission finished");
        Ok(phase)
    }

    /// Clear the frame and notice and go back to `Idle`.
    pub fn reset(&self) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        inner.state.reset()?;
        inner.notice = None;
        if inner.cancel.is_cancelled() {
            inner.cancel = CancellationToken::new();
        }
        Ok(())
    }

    /// Discard the held frame to capture again.
    pub fn retake(&self) -> Result<(), WorkflowError> {
        self.reset()
    }

    /// Close the current notice without changing state.
    pub fn dismiss(&self) {
        self.lock().notice = None;
    }

    /// Abort the in-flight submission, or the next one if none is running.
    ///
    /// Only that one attempt is affected: once it lands in `Failed` (or the
    /// workflow is reset) a fresh token is armed and submits reach the
    /// backend again.
    pub fn cancel(&self) {
        self.lock().cancel.cancel();
    }

    /// Token for the current attempt, for wiring an external abort signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }

    async fn call(&self, payload: &Payload) -> Result<Reply, ApiError> {
        match payload {
            Payload::Register(req) => self.api.register(req).await.map(Reply::Registered),
            Payload::Attend(req) => self.api.mark_attendance(req).await.map(Reply::Attended),
        }
    }

    /// Apply a reply (or cancellation, `None`) to a `Submitting` workflow.
    fn finish(&self, inner: &mut Inner, reply: Option<Result<Reply, ApiError>>) -> Phase {
        let frame = inner.state.frame().cloned();
        let fallback = self.kind.fallback_message();

        let failure = |message: String| WorkflowState::Failed {
            message,
            frame: frame.clone(),
        };

        let (state, notice) = match reply {
            None => (failure(MSG_CANCELLED.into()), Notice::error(MSG_CANCELLED)),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "submission transport failure");
                (failure(fallback.into()), Notice::error(fallback))
            }
            Some(Ok(Reply::Registered(env))) if env.success => {
                let message = env.message.unwrap_or_else(|| MSG_REGISTERED.into());
                inner.form = RegistrationForm::default();
                (
                    WorkflowState::Succeeded {
                        outcome: Outcome::Registered {
                            message: message.clone(),
                        },
                    },
                    Notice::success(message),
                )
            }
            Some(Ok(Reply::Attended(env))) if env.success => {
                let message = env.message.unwrap_or_else(|| MSG_ATTENDED.into());
                let receipt = AttendanceReceipt {
                    student: env.student,
                    message: message.clone(),
                    marked_at: Local::now(),
                };
                (
                    WorkflowState::Succeeded {
                        outcome: Outcome::Attended(receipt),
                    },
                    Notice::success(message),
                )
            }
            Some(Ok(Reply::Registered(Envelope { message, .. })))
            | Some(Ok(Reply::Attended(AttendanceEnvelope { message, .. }))) => {
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| fallback.into());
                (failure(message.clone()), Notice::error(message))
            }
        };

        inner.state = state;
        inner.notice = Some(notice);
        inner.state.phase()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthStatus, RecordsEnvelope, StudentsEnvelope};
    use attend_hw::{CameraConstraints, StillImageBackend};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Register(Envelope),
        Attend(AttendanceEnvelope),
        Transport,
        Hang,
    }

    struct FakeApi {
        script: Script,
        calls: AtomicUsize,
        last_register: Mutex<Option<RegisterRequest>>,
    }

    impl FakeApi {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
                last_register: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn enter(&self) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match self.script {
                Script::Transport => Err(ApiError::Status {
                    status: 503,
                    body: String::new(),
                }),
                Script::Hang => std::future::pending().await,
                _ => Ok(()),
            }
        }
    }

    impl RecognitionApi for FakeApi {
        async fn health(&self) -> Result<HealthStatus, ApiError> {
            unreachable!("health is not part of the workflow")
        }

        async fn register(&self, request: &RegisterRequest) -> Result<Envelope, ApiError> {
            *self.last_register.lock().unwrap() = Some(request.clone());
            self.enter().await?;
            match &self.script {
                Script::Register(env) => Ok(env.clone()),
                _ => panic!("unexpected register call"),
            }
        }

        async fn mark_attendance(
            &self,
            request: &AttendanceRequest,
        ) -> Result<AttendanceEnvelope, ApiError> {
            assert!(request.image.starts_with("data:image/jpeg;base64,"));
            self.enter().await?;
            match &self.script {
                Script::Attend(env) => Ok(env.clone()),
                _ => panic!("unexpected attendance call"),
            }
        }

        async fn reports(&self) -> Result<RecordsEnvelope, ApiError> {
            unreachable!()
        }

        async fn students(&self) -> Result<StudentsEnvelope, ApiError> {
            unreachable!()
        }
    }

    async fn ready_camera() -> CameraSession<StillImageBackend> {
        let (mut camera, _rx) = CameraSession::new(StillImageBackend::from_image(RgbImage::new(4, 4)));
        camera.initialize(CameraConstraints::default()).await.unwrap();
        camera
    }

    fn registered(message: &str) -> Script {
        Script::Register(Envelope {
            success: true,
            message: Some(message.into()),
        })
    }

    #[tokio::test]
    async fn test_registration_end_to_end() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("Registered")));
        let mut camera = ready_camera().await;

        wf.set_form(RegistrationForm::new("Ada Lovelace", "S100"));
        wf.request_capture(&mut camera).unwrap();
        assert_eq!(wf.phase(), Phase::Capturing);
        assert_eq!(wf.notice(), Some(Notice::success("Photo captured successfully!")));

        let phase = wf.submit().await.unwrap();
        assert_eq!(phase, Phase::Succeeded);
        assert_eq!(wf.api().calls(), 1);

        let view = wf.view();
        assert_eq!(view.form, RegistrationForm::default());
        assert!(!view.has_frame);
        assert_eq!(
            view.outcome,
            Some(Outcome::Registered {
                message: "Registered".into()
            })
        );
        assert_eq!(view.notice, Some(Notice::success("Registered")));

        let sent = wf.api().last_register.lock().unwrap().clone().unwrap();
        assert_eq!(sent.name, "Ada Lovelace");
        assert_eq!(sent.student_id, "S100");
        assert!(sent.image.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_registration_blank_fields_rejected_locally() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("Registered")));
        let mut camera = ready_camera().await;
        wf.set_form(RegistrationForm::new("  ", "S100"));
        wf.request_capture(&mut camera).unwrap();

        assert!(matches!(wf.submit().await, Err(WorkflowError::MissingFields)));
        assert_eq!(wf.notice(), Some(Notice::error("Please fill in all fields!")));
        assert_eq!(wf.phase(), Phase::Capturing);
        assert_eq!(wf.api().calls(), 0);
    }

    #[tokio::test]
    async fn test_registration_without_photo_rejected_locally() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("Registered")));
        wf.set_form(RegistrationForm::new("Ada Lovelace", "S100"));

        assert!(matches!(wf.submit().await, Err(WorkflowError::MissingPhoto)));
        assert_eq!(wf.notice(), Some(Notice::error("Please capture a photo!")));
        assert_eq!(wf.phase(), Phase::Idle);
        assert_eq!(wf.api().calls(), 0);
    }

    #[tokio::test]
    async fn test_second_submit_while_submitting_is_noop() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("Registered")));
        let mut camera = ready_camera().await;
        wf.set_form(RegistrationForm::new("Ada Lovelace", "S100"));
        wf.request_capture(&mut camera).unwrap();

        let (first, second) = tokio::join!(wf.submit(), wf.submit());
        assert_eq!(first.unwrap(), Phase::Succeeded);
        assert!(matches!(second, Err(WorkflowError::Busy)));
        assert_eq!(wf.api().calls(), 1);
    }

    #[tokio::test]
    async fn test_attendance_end_to_end_match_label() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Attend(AttendanceEnvelope {
            success: true,
            message: Some("Attendance marked successfully for Ada Lovelace!".into()),
            student: Some(MatchedStudent {
                name: "Ada Lovelace".into(),
                student_id: "S100".into(),
                confidence: 0.971,
            }),
        })));
        let mut camera = ready_camera().await;

        let before = Local::now();
        let phase = wf.capture_and_submit(&mut camera).await.unwrap();
        assert_eq!(phase, Phase::Succeeded);

        match wf.state() {
            WorkflowState::Succeeded {
                outcome: Outcome::Attended(receipt),
            } => {
                assert_eq!(receipt.match_label().as_deref(), Some("97.1% Match"));
                assert!(receipt.marked_at >= before);
                assert_eq!(receipt.student.unwrap().student_id, "S100");
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_business_error_shows_server_message() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Attend(AttendanceEnvelope {
            success: false,
            message: Some("Face not recognized!".into()),
            student: None,
        })));
        let mut camera = ready_camera().await;

        assert_eq!(wf.capture_and_submit(&mut camera).await.unwrap(), Phase::Failed);
        assert_eq!(wf.notice(), Some(Notice::error("Face not recognized!")));
        assert!(wf.view().has_frame);
    }

    #[tokio::test]
    async fn test_business_error_without_message_uses_fallback() {
        let wf = CaptureWorkflow::registration(FakeApi::new(Script::Register(Envelope {
            success: false,
            message: None,
        })));
        let mut camera = ready_camera().await;
        wf.set_form(RegistrationForm::new("Ada", "S1"));
        wf.request_capture(&mut camera).unwrap();

        assert_eq!(wf.submit().await.unwrap(), Phase::Failed);
        assert_eq!(
            wf.notice(),
            Some(Notice::error("Registration failed. Please try again."))
        );
        // Form is kept for a retry.
        assert_eq!(wf.view().form, RegistrationForm::new("Ada", "S1"));
    }

    #[tokio::test]
    async fn test_transport_error_uses_generic_message_then_reset() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Transport));
        let mut camera = ready_camera().await;

        assert_eq!(wf.capture_and_submit(&mut camera).await.unwrap(), Phase::Failed);
        assert_eq!(
            wf.notice(),
            Some(Notice::error("Failed to mark attendance. Please try again."))
        );

        wf.reset().unwrap();
        assert_eq!(wf.state(), WorkflowState::Idle);
        assert_eq!(wf.notice(), None);
    }

    #[tokio::test]
    async fn test_capture_without_ready_camera_stays_idle() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Transport));
        let (mut camera, _rx) =
            CameraSession::new(StillImageBackend::from_image(RgbImage::new(4, 4)));

        let result = wf.capture_and_submit(&mut camera).await;
        assert!(matches!(result, Err(WorkflowError::CameraNotReady)));
        assert_eq!(wf.phase(), Phase::Idle);
        assert_eq!(wf.notice(), Some(Notice::error("Camera is not ready.")));
        assert_eq!(wf.api().calls(), 0);
    }

    #[tokio::test]
    async fn test_capture_again_replaces_frame() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("ok")));
        let mut camera = ready_camera().await;

        wf.request_capture(&mut camera).unwrap();
        let first = wf.state().frame().cloned().unwrap();
        wf.request_capture(&mut camera).unwrap();
        let second = wf.state().frame().cloned().unwrap();

        assert_eq!(wf.phase(), Phase::Capturing);
        assert!(second.captured_at() >= first.captured_at());
    }

    #[tokio::test]
    async fn test_capture_rejected_after_success_until_reset() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("ok")));
        let mut camera = ready_camera().await;
        wf.set_form(RegistrationForm::new("Ada", "S1"));
        wf.request_capture(&mut camera).unwrap();
        wf.submit().await.unwrap();

        assert!(matches!(
            wf.request_capture(&mut camera),
            Err(WorkflowError::InvalidTransition {
                action: "capture",
                phase: Phase::Succeeded
            })
        ));
        wf.reset().unwrap();
        wf.request_capture(&mut camera).unwrap();
        assert_eq!(wf.phase(), Phase::Capturing);
    }

    #[tokio::test]
    async fn test_retake_clears_frame_and_notice() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("ok")));
        let mut camera = ready_camera().await;
        wf.request_capture(&mut camera).unwrap();

        wf.retake().unwrap();
        let view = wf.view();
        assert_eq!(view.phase, Phase::Idle);
        assert!(!view.has_frame);
        assert!(view.notice.is_none());
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_submission() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Hang));
        let mut camera = ready_camera().await;
        wf.request_capture(&mut camera).unwrap();

        let (phase, _) = tokio::join!(wf.submit(), async {
            tokio::task::yield_now().await;
            wf.cancel();
        });
        assert_eq!(phase.unwrap(), Phase::Failed);
        assert_eq!(wf.notice(), Some(Notice::error("Request cancelled.")));
        assert!(wf.view().has_frame);
    }

    #[tokio::test]
    async fn test_retry_after_cancel_and_reset_reaches_backend() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Attend(AttendanceEnvelope {
            success: true,
            message: None,
            student: None,
        })));
        let mut camera = ready_camera().await;

        wf.cancel();
        assert_eq!(wf.capture_and_submit(&mut camera).await.unwrap(), Phase::Failed);
        assert_eq!(wf.notice(), Some(Notice::error("Request cancelled.")));
        assert_eq!(wf.api().calls(), 0);

        wf.reset().unwrap();
        wf.request_capture(&mut camera).unwrap();
        assert_eq!(wf.submit().await.unwrap(), Phase::Succeeded);
        assert_eq!(wf.api().calls(), 1);
    }

    #[tokio::test]
    async fn test_resubmit_after_cancel_keeps_frame_and_succeeds() {
        let wf = CaptureWorkflow::registration(FakeApi::new(registered("Registered")));
        let mut camera = ready_camera().await;
        wf.set_form(RegistrationForm::new("Ada", "S1"));
        wf.request_capture(&mut camera).unwrap();

        let stale = wf.cancellation_token();
        wf.cancel();
        assert_eq!(wf.submit().await.unwrap(), Phase::Failed);
        assert!(stale.is_cancelled());
        assert!(!wf.cancellation_token().is_cancelled());

        assert_eq!(wf.submit().await.unwrap(), Phase::Succeeded);
        assert_eq!(wf.api().calls(), 1);
    }

    #[tokio::test]
    async fn test_camera_events_drive_readiness() {
        let wf = CaptureWorkflow::attendance(FakeApi::new(Script::Transport));
        let (mut camera, mut rx) =
            CameraSession::new(StillImageBackend::from_path("/nonexistent/attend.jpg"));

        assert!(camera.initialize(CameraConstraints::default()).await.is_err());
        wf.drain_camera_events(&mut rx);
        let view = wf.view();
        assert!(!view.camera_ready);
        assert_eq!(view.notice.map(|n| n.kind), Some(NoticeKind::Error));

        let mut camera = ready_camera().await;
        wf.apply_camera_event(&CameraEvent::Ready {
            width: 4,
            height: 4,
        });
        assert!(wf.view().camera_ready);
        wf.request_capture(&mut camera).unwrap();
    }

    #[test]
    fn test_notice_labels() {
        assert_eq!(NoticeKind::Success.label(), "success");
        assert_eq!(NoticeKind::Error.label(), "error");
    }
}
