// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use shared_database::error::{DatabaseError, FOREIGN_KEY_VIOLATION, NO_ROWS, UNIQUE_VIOLATION};
use shared_models::error::AppError;

/// Primary key type shared by every table; the fallback store hands out
/// process-scoped sequences of the same type.
pub type RecordId = i64;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: RecordId,
    pub patient_id: RecordId,
    pub doctor_id: RecordId,
    #[serde(default)]
    pub parent_appointment_id: Option<RecordId>,
    pub appointment_date: NaiveDate,
    #[serde(with = "time_of_day")]
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(flatten)]
    pub symptom_analysis: SymptomAnalysis,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.appointment_time)
    }

    /// True when the appointment is still upcoming and its slot is strictly
    /// before `now` (local wall clock, minute resolution).
    pub fn is_overdue_at(&self, now: NaiveDateTime) -> bool {
        if self.status != AppointmentStatus::Upcoming {
            return false;
        }

        let today = now.date();
        let current_minute = truncate_to_minute(now.time());

        self.appointment_date < today
            || (self.appointment_date == today && self.appointment_time < current_minute)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Upcoming,
    Completed,
    Cancelled,
    Missed,
}

impl AppointmentStatus {
    /// The scheduler only ever acts on upcoming rows.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Upcoming)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Upcoming => write!(f, "upcoming"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Missed => write!(f, "missed"),
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Ok(AppointmentStatus::Upcoming),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "missed" => Ok(AppointmentStatus::Missed),
            other => Err(AppointmentError::Validation(format!("invalid appointment status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentType {
    #[default]
    General,
    #[serde(alias = "follow_up", alias = "followup")]
    FollowUp,
    #[serde(alias = "check_up", alias = "checkup")]
    CheckUp,
    Consultation,
    Emergency,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::General => write!(f, "general"),
            AppointmentType::FollowUp => write!(f, "follow-up"),
            AppointmentType::CheckUp => write!(f, "check-up"),
            AppointmentType::Consultation => write!(f, "consultation"),
            AppointmentType::Emergency => write!(f, "emergency"),
        }
    }
}

/// Output of the (external) symptom checker, stored alongside the booking.
/// Attaching or changing it never affects appointment status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SymptomAnalysis {
    pub symptoms: Option<String>,
    pub possible_illness_1: Option<String>,
    pub possible_illness_2: Option<String>,
    pub recommended_specialist_1: Option<String>,
    pub recommended_specialist_2: Option<String>,
    pub criticality: Option<String>,
}

impl SymptomAnalysis {
    pub fn is_empty(&self) -> bool {
        self.symptoms.is_none()
            && self.possible_illness_1.is_none()
            && self.possible_illness_2.is_none()
            && self.recommended_specialist_1.is_none()
            && self.recommended_specialist_2.is_none()
            && self.criticality.is_none()
    }

    /// Overlay the fields present in `patch`, keeping the rest.
    pub fn merge(&mut self, patch: &SymptomAnalysis) {
        fn overlay(target: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                target.clone_from(value);
            }
        }

        overlay(&mut self.symptoms, &patch.symptoms);
        overlay(&mut self.possible_illness_1, &patch.possible_illness_1);
        overlay(&mut self.possible_illness_2, &patch.possible_illness_2);
        overlay(&mut self.recommended_specialist_1, &patch.recommended_specialist_1);
        overlay(&mut self.recommended_specialist_2, &patch.recommended_specialist_2);
        overlay(&mut self.criticality, &patch.criticality);
    }
}

// ==============================================================================
// CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub id: RecordId,
    pub appointment_id: RecordId,
    pub doctor_id: RecordId,
    pub patient_id: RecordId,
    pub status: ConsultationStatus,
    pub actual_start_time: DateTime<Utc>,
    #[serde(default)]
    pub actual_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    InProgress,
    Completed,
    Missed,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::InProgress => write!(f, "in_progress"),
            ConsultationStatus::Completed => write!(f, "completed"),
            ConsultationStatus::Missed => write!(f, "missed"),
        }
    }
}

/// Terminal outcome of a consultation. Both the consultation and its parent
/// appointment move to the matching status in one atomic write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationOutcome {
    Completed,
    Missed,
}

impl ConsultationOutcome {
    pub fn consultation_status(&self) -> ConsultationStatus {
        match self {
            ConsultationOutcome::Completed => ConsultationStatus::Completed,
            ConsultationOutcome::Missed => ConsultationStatus::Missed,
        }
    }

    pub fn appointment_status(&self) -> AppointmentStatus {
        match self {
            ConsultationOutcome::Completed => AppointmentStatus::Completed,
            ConsultationOutcome::Missed => AppointmentStatus::Missed,
        }
    }
}

impl fmt::Display for ConsultationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.consultation_status())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalRecord {
    pub id: RecordId,
    pub consultation_id: RecordId,
    pub patient_id: RecordId,
    pub doctor_id: RecordId,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: RecordId,
    pub consultation_id: RecordId,
    pub patient_id: RecordId,
    pub doctor_id: RecordId,
    pub medication_name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// PROFILE SUMMARIES (read-only, owned by the profile cells)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientSummary {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl PatientSummary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorSummary {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl DoctorSummary {
    pub fn full_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }
}

// ==============================================================================
// ENRICHED READ MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<PatientSummary>,
    pub doctor: Option<DoctorSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationDetails {
    #[serde(flatten)]
    pub consultation: Consultation,
    pub doctor: Option<DoctorSummary>,
    pub patient: Option<PatientSummary>,
    pub appointment: Option<Appointment>,
    pub medical_records: Vec<MedicalRecord>,
    pub prescriptions: Vec<Prescription>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: RecordId,
    pub doctor_id: RecordId,
    pub appointment_date: NaiveDate,
    /// "HH:MM", 24-hour local wall clock.
    pub appointment_time: String,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub parent_appointment_id: Option<RecordId>,
    #[serde(flatten)]
    pub symptom_analysis: SymptomAnalysis,
}

impl CreateAppointmentRequest {
    pub fn new(patient_id: RecordId, doctor_id: RecordId, appointment_date: NaiveDate, appointment_time: &str) -> Self {
        Self {
            patient_id,
            doctor_id,
            appointment_date,
            appointment_time: appointment_time.to_string(),
            appointment_type: AppointmentType::General,
            notes: None,
            location: None,
            parent_appointment_id: None,
            symptom_analysis: SymptomAnalysis::default(),
        }
    }
}

/// Merge-patch: absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(default)]
    pub appointment_date: Option<NaiveDate>,
    #[serde(default)]
    pub appointment_time: Option<String>,
    #[serde(default)]
    pub appointment_type: Option<AppointmentType>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(flatten)]
    pub symptom_analysis: SymptomAnalysis,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The durable backend could not be reached. Repositories absorb this by
    /// retrying on the fallback store; callers only see it as `StorageFailure`.
    #[error("Storage unreachable: {0}")]
    Connectivity(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl AppointmentError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AppointmentError::Connectivity(_))
    }
}

impl From<DatabaseError> for AppointmentError {
    fn from(error: DatabaseError) -> Self {
        match &error {
            DatabaseError::Connectivity(reason) => AppointmentError::Connectivity(reason.clone()),
            DatabaseError::Api { status, code, message } => match (code.as_deref(), *status) {
                (Some(UNIQUE_VIOLATION), _) => AppointmentError::Conflict(message.clone()),
                (Some(FOREIGN_KEY_VIOLATION), _) => AppointmentError::NotFound("referenced record".to_string()),
                (Some(NO_ROWS), _) | (_, 404) => AppointmentError::NotFound("record".to_string()),
                (Some(code), _) if code.starts_with("22") => AppointmentError::Validation(message.clone()),
                (_, 400) | (_, 422) => AppointmentError::Validation(message.clone()),
                _ => AppointmentError::StorageFailure(error.to_string()),
            },
            DatabaseError::Serialization(_) | DatabaseError::Request(_) => {
                AppointmentError::StorageFailure(error.to_string())
            }
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            AppointmentError::Conflict(msg) => AppError::Conflict(msg),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Connectivity(msg) | AppointmentError::StorageFailure(msg) => {
                AppError::ServiceUnavailable(format!("Service degraded: {}", msg))
            }
        }
    }
}

// ==============================================================================
// TIME-OF-DAY HANDLING
// ==============================================================================

pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// Parse a strict "HH:MM" 24-hour value.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, AppointmentError> {
    let trimmed = value.trim();
    let bytes = trimmed.as_bytes();

    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(AppointmentError::Validation(format!(
            "invalid time of day '{}', expected HH:MM", value
        )));
    }

    NaiveTime::parse_from_str(trimmed, "%H:%M").map_err(|_| {
        AppointmentError::Validation(format!("invalid time of day '{}', expected HH:MM", value))
    })
}

/// Serde adapter: writes "HH:MM", reads "HH:MM" or the "HH:MM:SS" form
/// Postgres returns for `time` columns.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S%.f"))
            .map(super::truncate_to_minute)
            .map_err(|_| de::Error::custom(format!("invalid time of day '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn appointment(date: &str, time: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: 1,
            patient_id: 10,
            doctor_id: 20,
            parent_appointment_id: None,
            appointment_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            appointment_time: parse_time_of_day(time).unwrap(),
            status,
            appointment_type: AppointmentType::General,
            notes: None,
            location: None,
            symptom_analysis: SymptomAnalysis::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_overdue_previous_day() {
        let apt = appointment("2025-06-01", "09:00", AppointmentStatus::Upcoming);
        assert!(apt.is_overdue_at(at("2025-06-02 00:00:00")));
    }

    #[test]
    fn test_overdue_same_day_uses_minute_resolution() {
        let apt = appointment("2025-06-01", "09:00", AppointmentStatus::Upcoming);

        assert!(!apt.is_overdue_at(at("2025-06-01 08:59:59")));
        assert!(!apt.is_overdue_at(at("2025-06-01 09:00:45")));
        assert!(apt.is_overdue_at(at("2025-06-01 09:01:00")));
    }

    #[test]
    fn test_terminal_appointments_are_never_overdue() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled, AppointmentStatus::Missed] {
            let apt = appointment("2020-01-01", "09:00", status);
            assert!(!apt.is_overdue_at(at("2025-06-02 00:00:00")));
        }
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_time_of_day("23:59").unwrap(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert_matches!(parse_time_of_day("9:30"), Err(AppointmentError::Validation(_)));
        assert_matches!(parse_time_of_day("24:00"), Err(AppointmentError::Validation(_)));
        assert_matches!(parse_time_of_day("12:60"), Err(AppointmentError::Validation(_)));
        assert_matches!(parse_time_of_day("noon"), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn test_appointment_reads_postgres_row() {
        let row = json!({
            "id": 7,
            "patient_id": 1,
            "doctor_id": 2,
            "appointment_date": "2025-06-01",
            "appointment_time": "09:00:00",
            "status": "upcoming",
            "appointment_type": "follow-up",
            "symptoms": "persistent cough",
            "possible_illness_1": "bronchitis",
            "created_at": "2025-05-01T08:00:00Z",
            "updated_at": "2025-05-01T08:00:00Z"
        });

        let apt: Appointment = serde_json::from_value(row).unwrap();
        assert_eq!(apt.appointment_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(apt.appointment_type, AppointmentType::FollowUp);
        assert_eq!(apt.symptom_analysis.possible_illness_1.as_deref(), Some("bronchitis"));
        assert_eq!(apt.parent_appointment_id, None);

        let written = serde_json::to_value(&apt).unwrap();
        assert_eq!(written["appointment_time"], "09:00");
        assert_eq!(written["appointment_type"], "follow-up");
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        assert_eq!("Cancelled".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::Cancelled);
        assert_matches!("rescheduled".parse::<AppointmentStatus>(), Err(AppointmentError::Validation(_)));
        assert!(serde_json::from_value::<AppointmentStatus>(json!("no_show")).is_err());
    }

    #[test]
    fn test_symptom_merge_keeps_unpatched_fields() {
        let mut analysis = SymptomAnalysis {
            symptoms: Some("headache".to_string()),
            criticality: Some("low".to_string()),
            ..SymptomAnalysis::default()
        };
        analysis.merge(&SymptomAnalysis {
            criticality: Some("high".to_string()),
            recommended_specialist_1: Some("Neurology".to_string()),
            ..SymptomAnalysis::default()
        });

        assert_eq!(analysis.symptoms.as_deref(), Some("headache"));
        assert_eq!(analysis.criticality.as_deref(), Some("high"));
        assert_eq!(analysis.recommended_specialist_1.as_deref(), Some("Neurology"));
    }

    #[test]
    fn test_database_error_classification() {
        assert_matches!(
            AppointmentError::from(DatabaseError::Connectivity("refused".into())),
            AppointmentError::Connectivity(_)
        );
        assert_matches!(
            AppointmentError::from(DatabaseError::from_response(409, r#"{"code":"23505","message":"dup"}"#)),
            AppointmentError::Conflict(_)
        );
        assert_matches!(
            AppointmentError::from(DatabaseError::from_response(400, r#"{"code":"22007","message":"bad date"}"#)),
            AppointmentError::Validation(_)
        );
        assert_matches!(
            AppointmentError::from(DatabaseError::from_response(500, "boom")),
            AppointmentError::StorageFailure(_)
        );
    }

    #[test]
    fn test_app_error_mapping() {
        assert_matches!(AppError::from(AppointmentError::NotFound("appointment".into())), AppError::NotFound(_));
        assert_matches!(AppError::from(AppointmentError::Conflict("dup".into())), AppError::Conflict(_));
        assert_matches!(AppError::from(AppointmentError::StorageFailure("down".into())), AppError::ServiceUnavailable(_));
    }
}
