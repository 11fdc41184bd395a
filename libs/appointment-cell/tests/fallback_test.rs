use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    AppointmentError, AppointmentStatus, ConsultationStatus, CreateAppointmentRequest,
    DoctorSummary, PatientSummary,
};
use appointment_cell::services::{
    AppointmentRepository, ConsultationRepository, FixedClock, StorageBackends,
};
use shared_utils::test_utils::TestConfig;

fn now() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2025-06-02 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

fn repositories(backends: Arc<StorageBackends>) -> (AppointmentRepository, ConsultationRepository) {
    let clock = Arc::new(FixedClock::new(now()));
    (
        AppointmentRepository::new(Arc::clone(&backends), clock.clone()),
        ConsultationRepository::new(backends, clock),
    )
}

fn seed_profiles(backends: &StorageBackends) {
    backends.fallback().remember_patient(PatientSummary {
        id: 501,
        user_id: None,
        first_name: "Sean".to_string(),
        last_name: "Kelly".to_string(),
        email: None,
        phone_number: None,
    });
    backends.fallback().remember_doctor(DoctorSummary {
        id: 601,
        user_id: None,
        first_name: "Orla".to_string(),
        last_name: "Doyle".to_string(),
        specialization: Some("Cardiology".to_string()),
        email: None,
        phone_number: None,
    });
}

#[tokio::test]
async fn test_every_operation_succeeds_while_database_is_unreachable() {
    let config = TestConfig::unreachable_database().to_app_config();
    let backends = Arc::new(StorageBackends::from_config(&config));
    seed_profiles(&backends);
    let (appointments, consultations) = repositories(Arc::clone(&backends));

    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let first = appointments.create(CreateAppointmentRequest::new(501, 601, date, "09:00")).await.unwrap();
    let second = appointments.create(CreateAppointmentRequest::new(501, 601, date, "10:00")).await.unwrap();

    // Fallback ids are process-scoped sequences.
    assert_eq!((first.id, second.id), (1, 2));
    assert!(backends.is_degraded());

    let details = appointments.get_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(details.doctor.unwrap().last_name, "Doyle");
    assert_eq!(appointments.list_for_patient(501, None).await.unwrap().len(), 2);

    let consultation = consultations.create(second.id, 601, 501).await.unwrap();
    assert_eq!(consultation.id, 1);
    assert_eq!(consultation.status, ConsultationStatus::InProgress);
    assert_matches!(
        consultations.create(second.id, 601, 501).await,
        Err(AppointmentError::Conflict(_))
    );

    consultations.complete_consultation(consultation.id).await.unwrap();

    let missed = appointments.detect_and_mark_missed().await.unwrap();
    assert_eq!(missed.iter().map(|a| a.id).collect::<Vec<_>>(), vec![first.id]);

    let completed = appointments.get_by_id(second.id).await.unwrap().unwrap();
    assert_eq!(completed.appointment.status, AppointmentStatus::Completed);
}

#[tokio::test]
async fn test_unseen_profile_while_degraded_is_storage_failure() {
    let config = TestConfig::unreachable_database().to_app_config();
    let backends = Arc::new(StorageBackends::from_config(&config));
    let (appointments, consultations) = repositories(Arc::clone(&backends));

    // The profiles exist upstream; this process has simply never seen them.
    let request = CreateAppointmentRequest::new(501, 601, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), "09:00");
    assert_matches!(appointments.create(request).await, Err(AppointmentError::StorageFailure(_)));

    seed_profiles(&backends);
    let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
    let booked = appointments.create(CreateAppointmentRequest::new(501, 601, date, "09:00")).await.unwrap();
    assert_matches!(
        consultations.create(booked.id, 602, 501).await,
        Err(AppointmentError::StorageFailure(_))
    );
}

#[tokio::test]
async fn test_disabled_fallback_surfaces_storage_failure() {
    let config = TestConfig {
        fallback_store_enabled: false,
        ..TestConfig::unreachable_database()
    }
    .to_app_config();
    let backends = Arc::new(StorageBackends::from_config(&config));
    let (appointments, _) = repositories(backends);

    assert_matches!(appointments.get_by_id(1).await, Err(AppointmentError::StorageFailure(_)));
    assert_matches!(appointments.detect_and_mark_missed().await, Err(AppointmentError::StorageFailure(_)));
}

#[tokio::test]
async fn test_timeout_falls_back() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(StdDuration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_database_url(&mock_server.uri()).to_app_config();
    let backends = Arc::new(StorageBackends::from_config(&config));
    let (appointments, _) = repositories(Arc::clone(&backends));

    let result = appointments.get_by_id(7).await.unwrap();
    assert!(result.is_none());
    assert!(backends.is_degraded());
}
