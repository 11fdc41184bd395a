// libs/appointment-cell/src/services/consultations.rs
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::models::{
    AppointmentError, AppointmentStatus, Consultation, ConsultationDetails, ConsultationOutcome,
    ConsultationStatus, RecordId,
};
use crate::services::clock::Clock;
use crate::services::fallback::StorageBackends;
use crate::services::store::{ConsultationFilter, NewConsultation};

pub struct ConsultationRepository {
    backends: Arc<StorageBackends>,
    clock: Arc<dyn Clock>,
}

impl ConsultationRepository {
    pub fn new(backends: Arc<StorageBackends>, clock: Arc<dyn Clock>) -> Self {
        Self { backends, clock }
    }

    /// Start the consultation for an upcoming appointment. At most one
    /// consultation exists per appointment.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        appointment_id: RecordId,
        doctor_id: RecordId,
        patient_id: RecordId,
    ) -> Result<Consultation, AppointmentError> {
        let appointment = self.backends
            .run("get_appointment", |store| async move { store.get_appointment(appointment_id).await })
            .await?
            .ok_or_else(|| AppointmentError::NotFound("appointment".to_string()))?;

        self.backends.require_doctor(doctor_id).await?;
        self.backends.require_patient(patient_id).await?;

        let existing = self.backends
            .run("get_consultation_by_appointment", |store| async move {
                store.get_consultation_by_appointment(appointment_id).await
            })
            .await?;
        if existing.is_some() {
            return Err(AppointmentError::Conflict(
                "consultation already exists for appointment".to_string(),
            ));
        }

        if appointment.doctor_id != doctor_id || appointment.patient_id != patient_id {
            return Err(AppointmentError::Validation(
                "doctor and patient must match the appointment".to_string(),
            ));
        }
        if appointment.status != AppointmentStatus::Upcoming {
            return Err(AppointmentError::Validation(format!(
                "cannot start a consultation for a {} appointment", appointment.status
            )));
        }

        let new_consultation = NewConsultation {
            appointment_id,
            doctor_id,
            patient_id,
            actual_start_time: self.clock.now_utc(),
        };

        let consultation = self.backends
            .run("insert_consultation", |store| {
                let new_consultation = new_consultation.clone();
                async move { store.insert_consultation(new_consultation).await }
            })
            .await?;

        info!("Consultation {} started for appointment {}", consultation.id, appointment_id);
        Ok(consultation)
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<ConsultationDetails>, AppointmentError> {
        let Some(consultation) = self.get_consultation(id).await? else {
            return Ok(None);
        };

        let doctor = self.backends.find_doctor(consultation.doctor_id).await?;
        let patient = self.backends.find_patient(consultation.patient_id).await?;
        let appointment_id = consultation.appointment_id;
        let appointment = self.backends
            .run("get_appointment", |store| async move { store.get_appointment(appointment_id).await })
            .await?;
        let medical_records = self.backends
            .run("medical_records_for", |store| async move { store.medical_records_for(id).await })
            .await?;
        let prescriptions = self.backends
            .run("prescriptions_for", |store| async move { store.prescriptions_for(id).await })
            .await?;

        Ok(Some(ConsultationDetails {
            consultation,
            doctor,
            patient,
            appointment,
            medical_records,
            prescriptions,
        }))
    }

    /// The bare consultation row, without related records.
    pub async fn get_consultation(&self, id: RecordId) -> Result<Option<Consultation>, AppointmentError> {
        self.backends
            .run("get_consultation", |store| async move { store.get_consultation(id).await })
            .await
    }

    pub async fn get_by_appointment_id(&self, appointment_id: RecordId) -> Result<Option<Consultation>, AppointmentError> {
        self.backends
            .run("get_consultation_by_appointment", |store| async move {
                store.get_consultation_by_appointment(appointment_id).await
            })
            .await
    }

    /// Completes the consultation and its appointment together.
    pub async fn complete_consultation(&self, id: RecordId) -> Result<Consultation, AppointmentError> {
        self.finish(id, ConsultationOutcome::Completed).await
    }

    pub async fn mark_consultation_as_missed(&self, id: RecordId) -> Result<Consultation, AppointmentError> {
        self.finish(id, ConsultationOutcome::Missed).await
    }

    #[instrument(skip(self))]
    async fn finish(&self, id: RecordId, outcome: ConsultationOutcome) -> Result<Consultation, AppointmentError> {
        let at = self.clock.now_utc();
        let finished = self.backends
            .run("finish_consultation", |store| async move {
                store.finish_consultation(id, outcome, at).await
            })
            .await?
            .ok_or_else(|| AppointmentError::NotFound("consultation".to_string()))?;

        info!("Consultation {} and appointment {} are now {}", id, finished.appointment_id, outcome);
        Ok(finished)
    }

    #[instrument(skip(self))]
    pub async fn list_for_doctor(
        &self,
        doctor_id: RecordId,
        status: Option<ConsultationStatus>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Consultation>, AppointmentError> {
        self.list(ConsultationFilter {
            doctor_id: Some(doctor_id),
            status,
            date,
            ..ConsultationFilter::default()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn list_for_patient(
        &self,
        patient_id: RecordId,
        status: Option<ConsultationStatus>,
    ) -> Result<Vec<Consultation>, AppointmentError> {
        self.list(ConsultationFilter {
            patient_id: Some(patient_id),
            status,
            ..ConsultationFilter::default()
        })
        .await
    }

    async fn list(&self, filter: ConsultationFilter) -> Result<Vec<Consultation>, AppointmentError> {
        self.backends
            .run("list_consultations", |store| {
                let filter = filter.clone();
                async move { store.list_consultations(&filter).await }
            })
            .await
    }
}
