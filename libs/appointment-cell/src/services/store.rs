// libs/appointment-cell/src/services/store.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentType, Consultation,
    ConsultationOutcome, ConsultationStatus, DoctorSummary, MedicalRecord, PatientSummary,
    Prescription, RecordId, SymptomAnalysis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Durable,
    Fallback,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Durable => write!(f, "durable"),
            Backend::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn postgrest_suffix(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// A validated booking, ready to insert. Status always starts at `upcoming`.
#[derive(Debug, Clone, Serialize)]
pub struct NewAppointment {
    pub patient_id: RecordId,
    pub doctor_id: RecordId,
    pub parent_appointment_id: Option<RecordId>,
    pub appointment_date: NaiveDate,
    #[serde(with = "crate::models::time_of_day")]
    pub appointment_time: NaiveTime,
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
    pub location: Option<String>,
    #[serde(flatten)]
    pub symptom_analysis: SymptomAnalysis,
    pub created_at: DateTime<Utc>,
}

impl NewAppointment {
    pub fn into_appointment(self, id: RecordId) -> Appointment {
        Appointment {
            id,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            parent_appointment_id: self.parent_appointment_id,
            appointment_date: self.appointment_date,
            appointment_time: self.appointment_time,
            status: AppointmentStatus::Upcoming,
            appointment_type: self.appointment_type,
            notes: self.notes,
            location: self.location,
            symptom_analysis: self.symptom_analysis,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Column-level merge patch. `updated_at` is always written.
#[derive(Debug, Clone)]
pub struct AppointmentPatch {
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    pub appointment_type: Option<AppointmentType>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub symptom_analysis: SymptomAnalysis,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentPatch {
    pub fn touch(updated_at: DateTime<Utc>) -> Self {
        Self {
            appointment_date: None,
            appointment_time: None,
            appointment_type: None,
            status: None,
            notes: None,
            location: None,
            symptom_analysis: SymptomAnalysis::default(),
            updated_at,
        }
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(date) = self.appointment_date {
            appointment.appointment_date = date;
        }
        if let Some(time) = self.appointment_time {
            appointment.appointment_time = time;
        }
        if let Some(appointment_type) = self.appointment_type {
            appointment.appointment_type = appointment_type;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if self.notes.is_some() {
            appointment.notes.clone_from(&self.notes);
        }
        if self.location.is_some() {
            appointment.location.clone_from(&self.location);
        }
        appointment.symptom_analysis.merge(&self.symptom_analysis);
        appointment.updated_at = self.updated_at;
    }

    /// PostgREST PATCH body containing only the columns being changed.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();

        if let Some(date) = self.appointment_date {
            body.insert("appointment_date".to_string(), serde_json::json!(date.format("%Y-%m-%d").to_string()));
        }
        if let Some(time) = self.appointment_time {
            body.insert("appointment_time".to_string(), serde_json::json!(time.format("%H:%M").to_string()));
        }
        if let Some(appointment_type) = self.appointment_type {
            body.insert("appointment_type".to_string(), serde_json::json!(appointment_type.to_string()));
        }
        if let Some(status) = self.status {
            body.insert("status".to_string(), serde_json::json!(status.to_string()));
        }
        if let Some(notes) = &self.notes {
            body.insert("notes".to_string(), serde_json::json!(notes));
        }
        if let Some(location) = &self.location {
            body.insert("location".to_string(), serde_json::json!(location));
        }
        if let Ok(serde_json::Value::Object(symptoms)) = serde_json::to_value(&self.symptom_analysis) {
            for (column, value) in symptoms {
                if !value.is_null() {
                    body.insert(column, value);
                }
            }
        }
        body.insert("updated_at".to_string(), serde_json::json!(self.updated_at.to_rfc3339()));

        serde_json::Value::Object(body)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<RecordId>,
    pub doctor_id: Option<RecordId>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub order: SortOrder,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self.date.map_or(true, |date| appointment.appointment_date == date)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConsultation {
    pub appointment_id: RecordId,
    pub doctor_id: RecordId,
    pub patient_id: RecordId,
    pub actual_start_time: DateTime<Utc>,
}

impl NewConsultation {
    pub fn into_consultation(self, id: RecordId) -> Consultation {
        Consultation {
            id,
            appointment_id: self.appointment_id,
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            status: ConsultationStatus::InProgress,
            actual_start_time: self.actual_start_time,
            actual_end_time: None,
            created_at: self.actual_start_time,
            updated_at: self.actual_start_time,
        }
    }
}

/// Filters consultations; `date` matches the UTC calendar day of
/// `actual_start_time`.
#[derive(Debug, Clone, Default)]
pub struct ConsultationFilter {
    pub doctor_id: Option<RecordId>,
    pub patient_id: Option<RecordId>,
    pub status: Option<ConsultationStatus>,
    pub date: Option<NaiveDate>,
}

impl ConsultationFilter {
    pub fn matches(&self, consultation: &Consultation) -> bool {
        self.doctor_id.map_or(true, |id| consultation.doctor_id == id)
            && self.patient_id.map_or(true, |id| consultation.patient_id == id)
            && self.status.map_or(true, |status| consultation.status == status)
            && self.date.map_or(true, |date| consultation.actual_start_time.date_naive() == date)
    }
}

/// Operations every storage backend exposes. The durable and fallback
/// implementations must be indistinguishable to repositories apart from
/// the `Connectivity` error, which only the durable backend produces.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    fn backend(&self) -> Backend;

    async fn find_patient(&self, id: RecordId) -> Result<Option<PatientSummary>, AppointmentError>;

    async fn find_doctor(&self, id: RecordId) -> Result<Option<DoctorSummary>, AppointmentError>;

    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<PatientSummary>, AppointmentError>;

    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError>;

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError>;

    async fn get_appointment(&self, id: RecordId) -> Result<Option<Appointment>, AppointmentError>;

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError>;

    async fn update_appointment(
        &self,
        id: RecordId,
        patch: AppointmentPatch,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Set `status = to`. With `only_from`, the write only happens while the
    /// row is still in that status; `None` is returned otherwise.
    async fn transition_appointment(
        &self,
        id: RecordId,
        to: AppointmentStatus,
        only_from: Option<AppointmentStatus>,
        at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Upcoming appointments whose slot lies strictly before `now`,
    /// ordered by (date, time) ascending.
    async fn find_overdue_appointments(&self, now: NaiveDateTime) -> Result<Vec<Appointment>, AppointmentError>;

    async fn insert_consultation(&self, consultation: NewConsultation) -> Result<Consultation, AppointmentError>;

    async fn get_consultation(&self, id: RecordId) -> Result<Option<Consultation>, AppointmentError>;

    async fn get_consultation_by_appointment(
        &self,
        appointment_id: RecordId,
    ) -> Result<Option<Consultation>, AppointmentError>;

    /// Ordered by `actual_start_time` descending.
    async fn list_consultations(&self, filter: &ConsultationFilter) -> Result<Vec<Consultation>, AppointmentError>;

    /// Atomically move the consultation and its parent appointment to the
    /// outcome's status. Either both rows change or neither does.
    async fn finish_consultation(
        &self,
        id: RecordId,
        outcome: ConsultationOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<Consultation>, AppointmentError>;

    async fn medical_records_for(&self, consultation_id: RecordId) -> Result<Vec<MedicalRecord>, AppointmentError>;

    async fn prescriptions_for(&self, consultation_id: RecordId) -> Result<Vec<Prescription>, AppointmentError>;
}
