//! Attendance reports: load, filter, aggregate, export.
//!
//! The fetched collections are an immutable [`ReportSnapshot`]; every view is
//! derived from it on demand and never written back.

use crate::api::{ApiError, RecognitionApi};
use crate::export::{ExportError, Exporter};
use crate::types::{AttendanceRecord, StudentProfile};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// CSV header row, in column order.
pub const CSV_HEADER: [&str; 5] = ["Student ID", "Name", "Date", "Time", "Status"];

/// Every exported row is a presence; absences are not tracked.
pub const STATUS_PRESENT: &str = "Present";

const ISO_DATE: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{what} request rejected: {message}")]
    Rejected { what: &'static str, message: String },
    #[error("report load cancelled")]
    Cancelled,
    #[error("reports are not loaded")]
    NotReady,
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

/// Which records a report shows. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub student_id: Option<String>,
    pub date: Option<String>,
}

impl ReportFilter {
    pub fn new(student_id: Option<String>, date: Option<String>) -> Self {
        Self { student_id, date }
    }

    pub fn is_empty(&self) -> bool {
        self.student_id.is_none() && self.date.is_none()
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        self.student_id
            .as_deref()
            .map_or(true, |id| record.student_id == id)
            && self.date.as_deref().map_or(true, |d| record.date == d)
    }
}

/// Records matching `filter`, in their original order.
pub fn filter_records(records: &[AttendanceRecord], filter: &ReportFilter) -> Vec<AttendanceRecord> {
    records
        .iter()
        .filter(|r| filter.matches(r))
        .cloned()
        .collect()
}

/// First occurrence of each student id, in record order.
pub fn unique_students(records: &[AttendanceRecord]) -> Vec<StudentProfile> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.student_id.as_str()))
        .map(|r| StudentProfile {
            student_id: r.student_id.clone(),
            name: r.name.clone(),
        })
        .collect()
}

/// Distinct dates, newest first. ISO dates sort chronologically as strings.
pub fn unique_dates(records: &[AttendanceRecord]) -> Vec<String> {
    let mut dates: Vec<String> = records
        .iter()
        .map(|r| r.date.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates
}

/// Number of records dated `day`.
pub fn count_on(records: &[AttendanceRecord], day: NaiveDate) -> usize {
    let day = day.format(ISO_DATE).to_string();
    records.iter().filter(|r| r.date == day).count()
}

/// Percentage of students present, rounded to one decimal. Zero students → 0.
pub fn attendance_rate(present: usize, total_students: usize) -> f64 {
    if total_students == 0 {
        return 0.0;
    }
    let pct = present as f64 / total_students as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

fn csv_line<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields
        .into_iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize rows with a header, every field quoted, rows joined by `\n`.
///
/// An empty slice yields an empty string (no header either).
pub fn to_csv(rows: &[AttendanceRecord]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(csv_line(CSV_HEADER));
    for r in rows {
        lines.push(csv_line([
            r.student_id.as_str(),
            r.name.as_str(),
            r.date.as_str(),
            r.time.as_str(),
            STATUS_PRESENT,
        ]));
    }
    lines.join("\n")
}

/// `attendance_reports_<YYYY-MM-DD>.csv` for the export moment.
pub fn export_filename<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!("attendance_reports_{}.csv", now.date_naive().format(ISO_DATE))
}

/// Both collections from one successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSnapshot {
    pub records: Vec<AttendanceRecord>,
    pub students: Vec<StudentProfile>,
}

impl ReportSnapshot {
    pub fn apply_filter(&self, filter: &ReportFilter) -> Vec<AttendanceRecord> {
        filter_records(&self.records, filter)
    }

    pub fn unique_students(&self) -> Vec<StudentProfile> {
        unique_students(&self.records)
    }

    pub fn unique_dates(&self) -> Vec<String> {
        unique_dates(&self.records)
    }

    /// Records dated today in local time. Evaluated on every call.
    pub fn today_count(&self) -> usize {
        count_on(&self.records, Local::now().date_naive())
    }

    pub fn total_students(&self) -> usize {
        self.students.len()
    }

    pub fn attendance_rate(&self) -> f64 {
        attendance_rate(self.today_count(), self.total_students())
    }

    /// Every derived figure for `filter`, with "today" fixed to `today`.
    pub fn view_on(&self, filter: &ReportFilter, today: NaiveDate) -> ReportView {
        let today_count = count_on(&self.records, today);
        let total_students = self.total_students();
        ReportView {
            filtered: self.apply_filter(filter),
            unique_students: self.unique_students(),
            unique_dates: self.unique_dates(),
            today_count,
            total_students,
            attendance_rate: attendance_rate(today_count, total_students),
        }
    }

    pub fn view(&self, filter: &ReportFilter) -> ReportView {
        self.view_on(filter, Local::now().date_naive())
    }
}

/// Derived, read-only presentation of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportView {
    pub filtered: Vec<AttendanceRecord>,
    pub unique_students: Vec<StudentProfile>,
    pub unique_dates: Vec<String>,
    pub today_count: usize,
    pub total_students: usize,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportState {
    /// Nothing requested yet.
    Idle,
    Loading,
    Ready(Arc<ReportSnapshot>),
    Error(String),
}

/// Fetches report data and serves views over the last good snapshot.
pub struct ReportEngine<A> {
    api: A,
    state: Mutex<ReportState>,
    /// Cancels the current (or next) load. Re-armed after it fires.
    cancel: Mutex<CancellationToken>,
}

impl<A: RecognitionApi> ReportEngine<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: Mutex::new(ReportState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> ReportState {
        self.lock().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<ReportSnapshot>> {
        match &*self.lock() {
            ReportState::Ready(snapshot) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Fetch records and students concurrently.
    ///
    /// The engine only becomes `Ready` when both succeed; a failure on either
    /// side leaves it in `Error` and nothing is merged.
    pub async fn load(&self) -> Result<Arc<ReportSnapshot>, ReportError> {
        *self.lock() = ReportState::Loading;
        let cancel = self.token().clone();
        tracing::debug!("loading reports");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReportError::Cancelled),
            both = async { tokio::try_join!(self.fetch_records(), self.fetch_students()) } => both,
        };

        match result {
            Ok((records, students)) => {
                tracing::info!(
                    records = records.len(),
                    students = students.len(),
                    "reports loaded"
                );
                let snapshot = Arc::new(ReportSnapshot { records, students });
                *self.lock() = ReportState::Ready(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(e) => {
                if matches!(e, ReportError::Cancelled) {
                    *self.token() = CancellationToken::new();
                }
                tracing::warn!(error = %e, "report load failed");
                *self.lock() = ReportState::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Abort the in-flight load, or the next one if none is running.
    ///
    /// The engine ends in `Error` and a later `load` starts with a fresh token.
    pub fn cancel(&self) {
        self.token().cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token().clone()
    }

    pub fn view(&self, filter: &ReportFilter) -> Result<ReportView, ReportError> {
        self.snapshot()
            .map(|s| s.view(filter))
            .ok_or(ReportError::NotReady)
    }

    /// Write the filtered records as CSV through `exporter`. Returns the filename used.
    pub fn export<E: Exporter>(
        &self,
        filter: &ReportFilter,
        exporter: &E,
        now: DateTime<Local>,
    ) -> Result<String, ReportError> {
        let snapshot = self.snapshot().ok_or(ReportError::NotReady)?;
        let rows = snapshot.apply_filter(filter);
        let filename = export_filename(&now);
        exporter.export(&filename, &to_csv(&rows))?;
        tracing::info!(%filename, rows = rows.len(), "report exported");
        Ok(filename)
    }

    async fn fetch_records(&self) -> Result<Vec<AttendanceRecord>, ReportError> {
        let env = self.api.reports().await?;
        if !env.success {
            return Err(ReportError::Rejected {
                what: "reports",
                message: env
                    .message
                    .unwrap_or_else(|| "Error getting reports".into()),
            });
        }
        Ok(env.records)
    }

    async fn fetch_students(&self) -> Result<Vec<StudentProfile>, ReportError> {
        let env = self.api.students().await?;
        if !env.success {
            return Err(ReportError::Rejected {
                what: "students",
                message: env
                    .message
                    .unwrap_or_else(|| "Error getting students".into()),
            });
        }
        Ok(env.students)
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
