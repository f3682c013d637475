//! attend-core: capture workflow, recognition API client and attendance reports.
//!
//! The workflow drives one registration or attendance attempt from a camera
//! frame to a server verdict; the report engine derives filtered views and CSV
//! exports from the backend's attendance records.

pub mod api;
pub mod export;
pub mod report;
pub mod types;
pub mod workflow;

pub use api::{ApiError, HttpApi, RecognitionApi};
pub use export::{ExportError, Exporter, FileExporter};
pub use report::{ReportEngine, ReportError, ReportFilter, ReportSnapshot, ReportState, ReportView};
pub use types::{AttendanceRecord, MatchedStudent, StudentProfile};
pub use workflow::{
    CaptureWorkflow, FlowKind, Notice, NoticeKind, Outcome, Phase, RegistrationForm,
    WorkflowError, WorkflowState, WorkflowView,
};
