// libs/appointment-cell/src/services/durable.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    truncate_to_minute, Appointment, AppointmentError, AppointmentStatus, Consultation,
    ConsultationOutcome, DoctorSummary, MedicalRecord, PatientSummary, Prescription, RecordId,
};
use crate::services::store::{
    AppointmentFilter, AppointmentPatch, Backend, ClinicStore, ConsultationFilter,
    NewAppointment, NewConsultation,
};

/// Postgres function performing the paired consultation/appointment update
/// in one transaction.
pub const FINISH_CONSULTATION_RPC: &str = "finish_consultation";

/// PostgREST-backed store. Every failure to reach the server surfaces as
/// `AppointmentError::Connectivity`.
pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self { supabase: Arc::new(SupabaseClient::new(config)) }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select<T>(&self, path: &str, what: &str) -> Result<Vec<T>, AppointmentError>
    where T: DeserializeOwned {
        let rows: Vec<Value> = self.supabase.request(Method::GET, path, None, None).await?;
        parse_rows(rows, what)
    }

    async fn select_one<T>(&self, path: &str, what: &str) -> Result<Option<T>, AppointmentError>
    where T: DeserializeOwned {
        Ok(self.select(path, what).await?.into_iter().next())
    }

    async fn write_one<T>(&self, method: Method, path: &str, body: Value, what: &str) -> Result<Option<T>, AppointmentError>
    where T: DeserializeOwned {
        let rows = self.supabase.request_returning(method, path, body).await?;
        Ok(parse_rows(rows, what)?.into_iter().next())
    }
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Result<Vec<T>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| AppointmentError::StorageFailure(format!("Failed to parse {}: {}", what, e)))
}

fn appointment_query(filter: &AppointmentFilter) -> String {
    let mut query_parts = Vec::new();

    if let Some(patient_id) = filter.patient_id {
        query_parts.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(doctor_id) = filter.doctor_id {
        query_parts.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(status) = filter.status {
        query_parts.push(format!("status=eq.{}", status));
    }
    if let Some(date) = filter.date {
        query_parts.push(format!("appointment_date=eq.{}", date.format("%Y-%m-%d")));
    }

    let direction = filter.order.postgrest_suffix();
    query_parts.push(format!(
        "order=appointment_date.{dir},appointment_time.{dir},id.{dir}",
        dir = direction
    ));

    format!("/rest/v1/appointments?{}", query_parts.join("&"))
}

fn consultation_query(filter: &ConsultationFilter) -> String {
    let mut query_parts = Vec::new();

    if let Some(doctor_id) = filter.doctor_id {
        query_parts.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(patient_id) = filter.patient_id {
        query_parts.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(status) = filter.status {
        query_parts.push(format!("status=eq.{}", status));
    }
    if let Some(date) = filter.date {
        let (start, end) = utc_day_bounds(date);
        query_parts.push(format!("actual_start_time=gte.{}", urlencoding::encode(&start)));
        query_parts.push(format!("actual_start_time=lt.{}", urlencoding::encode(&end)));
    }
    query_parts.push("order=actual_start_time.desc,id.desc".to_string());

    format!("/rest/v1/consultations?{}", query_parts.join("&"))
}

fn utc_day_bounds(date: NaiveDate) -> (String, String) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1);
    (start.to_rfc3339(), end.to_rfc3339())
}

fn overdue_query(now: NaiveDateTime) -> String {
    let today = now.date().format("%Y-%m-%d");
    let minute = truncate_to_minute(now.time()).format("%H:%M");

    format!(
        "/rest/v1/appointments?status=eq.upcoming\
         &or=(appointment_date.lt.{today},and(appointment_date.eq.{today},appointment_time.lt.{minute}))\
         &order=appointment_date.asc,appointment_time.asc,id.asc",
        today = today,
        minute = minute
    )
}

#[async_trait]
impl ClinicStore for SupabaseStore {
    fn backend(&self) -> Backend {
        Backend::Durable
    }

    async fn find_patient(&self, id: RecordId) -> Result<Option<PatientSummary>, AppointmentError> {
        let path = format!("/rest/v1/patients?id=eq.{}", id);
        self.select_one(&path, "patient").await
    }

    async fn find_doctor(&self, id: RecordId) -> Result<Option<DoctorSummary>, AppointmentError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", id);
        self.select_one(&path, "doctor").await
    }

    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<PatientSummary>, AppointmentError> {
        let path = format!("/rest/v1/patients?user_id=eq.{}", user_id);
        self.select_one(&path, "patient").await
    }

    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError> {
        let path = format!("/rest/v1/doctors?user_id=eq.{}", user_id);
        self.select_one(&path, "doctor").await
    }

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        let mut body = serde_json::to_value(&appointment)
            .map_err(|e| AppointmentError::StorageFailure(format!("Failed to encode appointment: {}", e)))?;
        if let Value::Object(columns) = &mut body {
            columns.insert("status".to_string(), json!(AppointmentStatus::Upcoming.to_string()));
            columns.insert("updated_at".to_string(), json!(appointment.created_at.to_rfc3339()));
        }

        let created: Option<Appointment> = self
            .write_one(Method::POST, "/rest/v1/appointments", body, "created appointment")
            .await?;
        let created = created.ok_or_else(|| {
            AppointmentError::StorageFailure("Failed to create appointment".to_string())
        })?;

        info!("Appointment {} stored in durable backend", created.id);
        Ok(created)
    }

    async fn get_appointment(&self, id: RecordId) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        self.select_one(&path, "appointment").await
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let path = appointment_query(filter);
        debug!("Listing appointments: {}", path);
        self.select(&path, "appointments").await
    }

    async fn update_appointment(
        &self,
        id: RecordId,
        patch: AppointmentPatch,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        self.write_one(Method::PATCH, &path, patch.to_json(), "updated appointment").await
    }

    async fn transition_appointment(
        &self,
        id: RecordId,
        to: AppointmentStatus,
        only_from: Option<AppointmentStatus>,
        at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut path = format!("/rest/v1/appointments?id=eq.{}", id);
        if let Some(expected) = only_from {
            path.push_str(&format!("&status=eq.{}", expected));
        }

        let body = json!({
            "status": to.to_string(),
            "updated_at": at.to_rfc3339()
        });

        self.write_one(Method::PATCH, &path, body, "appointment").await
    }

    async fn find_overdue_appointments(&self, now: NaiveDateTime) -> Result<Vec<Appointment>, AppointmentError> {
        self.select(&overdue_query(now), "overdue appointments").await
    }

    async fn insert_consultation(&self, consultation: NewConsultation) -> Result<Consultation, AppointmentError> {
        let body = json!({
            "appointment_id": consultation.appointment_id,
            "doctor_id": consultation.doctor_id,
            "patient_id": consultation.patient_id,
            "status": "in_progress",
            "actual_start_time": consultation.actual_start_time.to_rfc3339(),
            "created_at": consultation.actual_start_time.to_rfc3339(),
            "updated_at": consultation.actual_start_time.to_rfc3339()
        });

        let created: Option<Consultation> = self
            .write_one(Method::POST, "/rest/v1/consultations", body, "created consultation")
            .await?;

        created.ok_or_else(|| AppointmentError::StorageFailure("Failed to create consultation".to_string()))
    }

    async fn get_consultation(&self, id: RecordId) -> Result<Option<Consultation>, AppointmentError> {
        let path = format!("/rest/v1/consultations?id=eq.{}", id);
        self.select_one(&path, "consultation").await
    }

    async fn get_consultation_by_appointment(
        &self,
        appointment_id: RecordId,
    ) -> Result<Option<Consultation>, AppointmentError> {
        let path = format!("/rest/v1/consultations?appointment_id=eq.{}", appointment_id);
        self.select_one(&path, "consultation").await
    }

    async fn list_consultations(&self, filter: &ConsultationFilter) -> Result<Vec<Consultation>, AppointmentError> {
        self.select(&consultation_query(filter), "consultations").await
    }

    async fn finish_consultation(
        &self,
        id: RecordId,
        outcome: ConsultationOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<Consultation>, AppointmentError> {
        let args = json!({
            "consultation_id": id,
            "outcome": outcome.to_string(),
            "ended_at": at.to_rfc3339()
        });

        let rows: Vec<Value> = self.supabase.rpc(FINISH_CONSULTATION_RPC, args).await?;
        Ok(parse_rows::<Consultation>(rows, "finished consultation")?.into_iter().next())
    }

    async fn medical_records_for(&self, consultation_id: RecordId) -> Result<Vec<MedicalRecord>, AppointmentError> {
        let path = format!("/rest/v1/medical_records?consultation_id=eq.{}&order=created_at.asc", consultation_id);
        self.select(&path, "medical records").await
    }

    async fn prescriptions_for(&self, consultation_id: RecordId) -> Result<Vec<Prescription>, AppointmentError> {
        let path = format!("/rest/v1/prescriptions?consultation_id=eq.{}&order=created_at.asc", consultation_id);
        self.select(&path, "prescriptions").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::SortOrder;

    #[test]
    fn test_overdue_query_uses_minute_resolution() {
        let now = NaiveDateTime::parse_from_str("2025-06-01 09:30:59", "%Y-%m-%d %H:%M:%S").unwrap();
        let query = overdue_query(now);

        assert!(query.contains("status=eq.upcoming"));
        assert!(query.contains("appointment_date.lt.2025-06-01"));
        assert!(query.contains("appointment_time.lt.09:30)"));
    }

    #[test]
    fn test_appointment_query_orders_in_both_directions() {
        let filter = AppointmentFilter {
            patient_id: Some(4),
            order: SortOrder::Descending,
            ..AppointmentFilter::default()
        };

        let query = appointment_query(&filter);
        assert!(query.starts_with("/rest/v1/appointments?patient_id=eq.4&"));
        assert!(query.ends_with("order=appointment_date.desc,appointment_time.desc,id.desc"));
    }

    #[test]
    fn test_consultation_day_filter_is_utc_bounded() {
        let filter = ConsultationFilter {
            date: NaiveDate::from_ymd_opt(2025, 6, 1),
            ..ConsultationFilter::default()
        };

        let query = consultation_query(&filter);
        assert!(query.contains("actual_start_time=gte.2025-06-01T00%3A00%3A00%2B00%3A00"));
        assert!(query.contains("actual_start_time=lt.2025-06-02T00%3A00%3A00%2B00%3A00"));
    }
}
