// libs/appointment-cell/src/services/appointments.rs
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::models::{
    parse_time_of_day, Appointment, AppointmentDetails, AppointmentError, AppointmentStatus,
    CreateAppointmentRequest, RecordId, SymptomAnalysis, UpdateAppointmentRequest,
};
use crate::services::clock::Clock;
use crate::services::fallback::StorageBackends;
use crate::services::store::{AppointmentFilter, AppointmentPatch, NewAppointment, SortOrder};

pub struct AppointmentRepository {
    backends: Arc<StorageBackends>,
    clock: Arc<dyn Clock>,
}

impl AppointmentRepository {
    pub fn new(backends: Arc<StorageBackends>, clock: Arc<dyn Clock>) -> Self {
        Self { backends, clock }
    }

    pub fn backends(&self) -> &Arc<StorageBackends> {
        &self.backends
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Book a new appointment. Patient, doctor and (when given) the parent
    /// appointment must exist before anything is written.
    #[instrument(skip(self, request), fields(patient_id = request.patient_id, doctor_id = request.doctor_id))]
    pub async fn create(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let appointment_time = parse_time_of_day(&request.appointment_time)?;

        self.backends.require_patient(request.patient_id).await?;
        self.backends.require_doctor(request.doctor_id).await?;
        if let Some(parent_id) = request.parent_appointment_id {
            let parent = self.backends
                .run("get_appointment", |store| async move { store.get_appointment(parent_id).await })
                .await?;
            if parent.is_none() {
                return Err(AppointmentError::NotFound("parent appointment".to_string()));
            }
        }

        let new_appointment = NewAppointment {
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            parent_appointment_id: request.parent_appointment_id,
            appointment_date: request.appointment_date,
            appointment_time,
            appointment_type: request.appointment_type,
            notes: request.notes,
            location: request.location,
            symptom_analysis: request.symptom_analysis,
            created_at: self.clock.now_utc(),
        };

        let appointment = self.backends
            .run("insert_appointment", |store| {
                let new_appointment = new_appointment.clone();
                async move { store.insert_appointment(new_appointment).await }
            })
            .await?;

        info!("Appointment {} booked for {} {}",
              appointment.id, appointment.appointment_date, appointment.appointment_time.format("%H:%M"));
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<AppointmentDetails>, AppointmentError> {
        let appointment = self.backends
            .run("get_appointment", |store| async move { store.get_appointment(id).await })
            .await?;

        let Some(appointment) = appointment else {
            debug!("Appointment {} not found", id);
            return Ok(None);
        };

        let patient = self.backends.find_patient(appointment.patient_id).await?;
        let doctor = self.backends.find_doctor(appointment.doctor_id).await?;

        Ok(Some(AppointmentDetails { appointment, patient, doctor }))
    }

    /// Newest first, each with the doctor embedded.
    #[instrument(skip(self))]
    pub async fn list_for_patient(
        &self,
        patient_id: RecordId,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let filter = AppointmentFilter {
            patient_id: Some(patient_id),
            status,
            order: SortOrder::Descending,
            ..AppointmentFilter::default()
        };
        let appointments = self.list(filter).await?;

        let mut details = Vec::with_capacity(appointments.len());
        for appointment in appointments {
            let doctor = self.backends.find_doctor(appointment.doctor_id).await?;
            details.push(AppointmentDetails { appointment, patient: None, doctor });
        }
        Ok(details)
    }

    /// Earliest first, each with the patient embedded.
    #[instrument(skip(self))]
    pub async fn list_for_doctor(
        &self,
        doctor_id: RecordId,
        status: Option<AppointmentStatus>,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let filter = AppointmentFilter {
            doctor_id: Some(doctor_id),
            status,
            date,
            order: SortOrder::Ascending,
            ..AppointmentFilter::default()
        };
        let appointments = self.list(filter).await?;

        let mut details = Vec::with_capacity(appointments.len());
        for appointment in appointments {
            let patient = self.backends.find_patient(appointment.patient_id).await?;
            details.push(AppointmentDetails { appointment, patient, doctor: None });
        }
        Ok(details)
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        self.backends
            .run("list_appointments", |store| {
                let filter = filter.clone();
                async move { store.list_appointments(&filter).await }
            })
            .await
    }

    /// Merge-patch: only the fields present in `request` change.
    #[instrument(skip(self, request))]
    pub async fn update(&self, id: RecordId, request: UpdateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let appointment_time = request.appointment_time
            .as_deref()
            .map(parse_time_of_day)
            .transpose()?;

        let patch = AppointmentPatch {
            appointment_date: request.appointment_date,
            appointment_time,
            appointment_type: request.appointment_type,
            status: request.status,
            notes: request.notes,
            location: request.location,
            symptom_analysis: request.symptom_analysis,
            updated_at: self.clock.now_utc(),
        };

        self.apply_patch(id, patch).await
    }

    /// Store the symptom checker's output on an existing booking. Status is
    /// left as it is.
    #[instrument(skip(self, analysis))]
    pub async fn attach_symptom_analysis(
        &self,
        id: RecordId,
        analysis: SymptomAnalysis,
    ) -> Result<Appointment, AppointmentError> {
        if analysis.is_empty() {
            return Err(AppointmentError::Validation("symptom analysis is empty".to_string()));
        }

        let mut patch = AppointmentPatch::touch(self.clock.now_utc());
        patch.symptom_analysis = analysis;

        self.apply_patch(id, patch).await
    }

    async fn apply_patch(&self, id: RecordId, patch: AppointmentPatch) -> Result<Appointment, AppointmentError> {
        let updated = self.backends
            .run("update_appointment", |store| {
                let patch = patch.clone();
                async move { store.update_appointment(id, patch).await }
            })
            .await?;

        updated.ok_or_else(|| AppointmentError::NotFound("appointment".to_string()))
    }

    pub async fn cancel(&self, id: RecordId) -> Result<Appointment, AppointmentError> {
        self.force_status(id, AppointmentStatus::Cancelled).await
    }

    pub async fn complete(&self, id: RecordId) -> Result<Appointment, AppointmentError> {
        self.force_status(id, AppointmentStatus::Completed).await
    }

    pub async fn mark_missed(&self, id: RecordId) -> Result<Appointment, AppointmentError> {
        self.force_status(id, AppointmentStatus::Missed).await
    }

    #[instrument(skip(self))]
    async fn force_status(&self, id: RecordId, status: AppointmentStatus) -> Result<Appointment, AppointmentError> {
        let at = self.clock.now_utc();
        let updated = self.backends
            .run("transition_appointment", |store| async move {
                store.transition_appointment(id, status, None, at).await
            })
            .await?;

        let appointment = updated.ok_or_else(|| AppointmentError::NotFound("appointment".to_string()))?;
        info!("Appointment {} is now {}", id, status);
        Ok(appointment)
    }

    /// Mark every upcoming appointment whose slot has passed as missed,
    /// using the clock's current local time.
    pub async fn detect_and_mark_missed(&self) -> Result<Vec<Appointment>, AppointmentError> {
        let now = self.clock.now();
        self.detect_and_mark_missed_at(now).await
    }

    /// Same as [`detect_and_mark_missed`](Self::detect_and_mark_missed) with
    /// an explicit local "now". Rows that could not be written stay
    /// `upcoming` and are picked up by the next sweep.
    pub async fn detect_and_mark_missed_at(&self, now: NaiveDateTime) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.sweep_overdue_at(now).await?.missed)
    }

    pub async fn sweep_overdue(&self) -> Result<MissedSweep, AppointmentError> {
        let now = self.clock.now();
        self.sweep_overdue_at(now).await
    }

    /// Only a failed overdue query is an error. Each row is written on its
    /// own; a row that fails is recorded and the sweep moves on. Rows that
    /// left `upcoming` between the query and the write are skipped.
    #[instrument(skip(self))]
    pub async fn sweep_overdue_at(&self, now: NaiveDateTime) -> Result<MissedSweep, AppointmentError> {
        let overdue = self.backends
            .run("find_overdue_appointments", |store| async move {
                store.find_overdue_appointments(now).await
            })
            .await?;

        let mut sweep = MissedSweep::default();
        if overdue.is_empty() {
            debug!("No overdue appointments as of {}", now.format("%Y-%m-%d %H:%M"));
            return Ok(sweep);
        }

        let at = self.clock.now_utc();
        for appointment in overdue {
            let id = appointment.id;
            let marked = self.backends
                .run("transition_appointment", |store| async move {
                    store
                        .transition_appointment(id, AppointmentStatus::Missed, Some(AppointmentStatus::Upcoming), at)
                        .await
                })
                .await;

            match marked {
                Ok(Some(appointment)) => sweep.missed.push(appointment),
                Ok(None) => warn!("Appointment {} changed before it could be marked missed, skipping", id),
                Err(e) => {
                    error!("Failed to mark appointment {} as missed: {}", id, e);
                    sweep.failures.push((id, e));
                }
            }
        }

        Ok(sweep)
    }
}

/// Result of one missed-appointment pass.
#[derive(Debug, Default)]
pub struct MissedSweep {
    pub missed: Vec<Appointment>,
    pub failures: Vec<(RecordId, AppointmentError)>,
}

impl MissedSweep {
    pub fn missed_ids(&self) -> Vec<RecordId> {
        self.missed.iter().map(|apt| apt.id).collect()
    }

    pub fn failed_ids(&self) -> Vec<RecordId> {
        self.failures.iter().map(|(id, _)| *id).collect()
    }
}
