use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    AppointmentError, AppointmentStatus, ConsultationStatus, CreateAppointmentRequest,
};
use appointment_cell::services::{
    AppointmentRepository, ConsultationRepository, FixedClock, StorageBackends,
};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

const PATIENT_USER: &str = "5f0c1b7e-9a53-4a8b-9d4e-2c0e6f6f1a11";
const DOCTOR_USER: &str = "8b2d3c4e-1f6a-4e7b-8c9d-0a1b2c3d4e5f";

fn now() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2025-06-02 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

fn setup(mock_server: &MockServer) -> (Arc<StorageBackends>, AppointmentRepository, ConsultationRepository) {
    let config = TestConfig::with_database_url(&mock_server.uri()).to_app_config();
    let backends = Arc::new(StorageBackends::from_config(&config));
    let clock = Arc::new(FixedClock::new(now()));
    (
        Arc::clone(&backends),
        AppointmentRepository::new(Arc::clone(&backends), clock.clone()),
        ConsultationRepository::new(backends, clock),
    )
}

async fn mount_profiles(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", "eq.11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_row(11, PATIENT_USER, "Aoife", "Byrne")
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", "eq.22"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_row(22, DOCTOR_USER, "Ciaran", "Walsh", "General Practice")
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_get_by_id_embeds_profiles_from_supabase() {
    let mock_server = MockServer::start().await;
    mount_profiles(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(7, 11, 22, "2025-06-03", "10:00:00", "upcoming")
        ])))
        .mount(&mock_server)
        .await;

    let (backends, appointments, _) = setup(&mock_server);
    let details = appointments.get_by_id(7).await.unwrap().unwrap();

    assert_eq!(details.appointment.appointment_time.format("%H:%M").to_string(), "10:00");
    assert_eq!(details.patient.unwrap().full_name(), "Aoife Byrne");
    assert_eq!(details.doctor.unwrap().full_name(), "Dr. Ciaran Walsh");
    assert!(!backends.is_degraded());
}

#[tokio::test]
async fn test_create_posts_upcoming_row() {
    let mock_server = MockServer::start().await;
    mount_profiles(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "patient_id": 11,
            "doctor_id": 22,
            "appointment_date": "2025-06-03",
            "appointment_time": "10:00",
            "status": "upcoming"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(31, 11, 22, "2025-06-03", "10:00:00", "upcoming")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_, appointments, _) = setup(&mock_server);
    let request = CreateAppointmentRequest::new(11, 22, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(), "10:00");
    let created = appointments.create(request).await.unwrap();

    assert_eq!(created.id, 31);
    assert_eq!(created.status, AppointmentStatus::Upcoming);
}

#[tokio::test]
async fn test_sweep_queries_overdue_rows_and_guards_the_update() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.upcoming"))
        .and(query_param(
            "or",
            "(appointment_date.lt.2025-06-02,and(appointment_date.eq.2025-06-02,appointment_time.lt.00:00))",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(7, 11, 22, "2025-06-01", "09:00:00", "upcoming"),
            MockSupabaseResponses::appointment_row(8, 11, 22, "2025-06-01", "11:00:00", "upcoming")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.7"))
        .and(query_param("status", "eq.upcoming"))
        .and(body_partial_json(json!({"status": "missed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(7, 11, 22, "2025-06-01", "09:00:00", "missed")
        ])))
        .mount(&mock_server)
        .await;

    // Appointment 8 was cancelled between the query and the update.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let (_, appointments, _) = setup(&mock_server);
    let missed = appointments.detect_and_mark_missed().await.unwrap();

    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].id, 7);
    assert_eq!(missed[0].status, AppointmentStatus::Missed);
}

#[tokio::test]
async fn test_complete_consultation_uses_single_rpc() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/finish_consultation"))
        .and(body_partial_json(json!({"consultation_id": 5, "outcome": "completed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_row(5, 7, 22, 11, "completed")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_, _, consultations) = setup(&mock_server);
    let completed = consultations.complete_consultation(5).await.unwrap();

    assert_eq!(completed.status, ConsultationStatus::Completed);
    assert!(completed.actual_end_time.is_some());
}

#[tokio::test]
async fn test_unique_violation_is_not_retried_on_fallback() {
    let mock_server = MockServer::start().await;
    mount_profiles(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(7, 11, 22, "2025-06-03", "10:00:00", "upcoming")
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockSupabaseResponses::error_response("duplicate key value violates unique constraint", "23505"),
        ))
        .mount(&mock_server)
        .await;

    let (backends, _, consultations) = setup(&mock_server);
    assert_matches!(consultations.create(7, 22, 11).await, Err(AppointmentError::Conflict(_)));
    assert!(!backends.is_degraded());
}

#[tokio::test]
async fn test_gateway_failure_falls_back_with_remembered_profiles() {
    let mock_server = MockServer::start().await;
    mount_profiles(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&mock_server)
        .await;

    let (backends, appointments, _) = setup(&mock_server);
    let request = CreateAppointmentRequest::new(11, 22, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(), "10:00");
    let created = appointments.create(request).await.unwrap();

    assert_eq!(created.id, 1);
    assert!(backends.is_degraded());
    assert_eq!(backends.fallback().appointment_count(), 1);
}
