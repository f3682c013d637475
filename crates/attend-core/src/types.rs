use serde::{Deserialize, Serialize};

/// A registered student, as returned by `GET /students`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    #[serde(default)]
    pub name: String,
}

/// One attendance mark, as returned by `GET /reports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub name: String,
    /// ISO calendar date (`YYYY-MM-DD`).
    #[serde(default)]
    pub date: String,
    /// Local clock time as recorded by the server.
    #[serde(default)]
    pub time: String,
}

/// Identity the backend matched a probe image to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedStudent {
    pub name: String,
    pub student_id: String,
    /// Match confidence, nominally in [0, 1]. Some backends send 0-100;
    /// see [`confidence_percent`](Self::confidence_percent).
    #[serde(default)]
    pub confidence: f64,
}

impl MatchedStudent {
    /// Confidence as a percentage in [0, 100].
    ///
    /// The wire value carries no unit, so the scale is inferred: anything above
    /// 1 is taken as already a percentage, anything at or below 1 as a fraction.
    /// This is ambiguous for a percentage backend reporting a score of 1% or
    /// less (0.8 meaning 0.8%), which is shown as 80%. Non-finite values map to 0.
    pub fn confidence_percent(&self) -> f64 {
        let pct = if self.confidence > 1.0 {
            self.confidence
        } else {
            self.confidence * 100.0
        };
        if pct.is_finite() {
            pct.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Display label, e.g. `"97.1% Match"`.
    pub fn match_label(&self) -> String {
        format!("{:.1}% Match", self.confidence_percent())
    }
}

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub face_recognition: Option<bool>,
    #[serde(default)]
    pub database: Option<bool>,
}

/// Bare `{success, message}` envelope (`POST /register`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /attendance` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub student: Option<MatchedStudent>,
}

/// `GET /reports` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
}

/// `GET /students` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentsEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub students: Vec<StudentProfile>,
}

/// `POST /register` body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub student_id: String,
    /// `data:image/jpeg;base64,...`
    pub image: String,
}

/// `POST /attendance` body.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRequest {
    pub image: String,
}
