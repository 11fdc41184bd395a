// libs/appointment-cell/src/services/memory.rs
//
// In-process fallback store. Used only while the durable backend is
// unreachable; contents live for the lifetime of the process.
//

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, Consultation, ConsultationOutcome,
    DoctorSummary, MedicalRecord, PatientSummary, Prescription, RecordId,
};
use crate::services::store::{
    AppointmentFilter, AppointmentPatch, Backend, ClinicStore, ConsultationFilter,
    NewAppointment, NewConsultation, SortOrder,
};

#[derive(Debug, Default)]
struct MemoryState {
    appointment_seq: RecordId,
    consultation_seq: RecordId,
    appointments: BTreeMap<RecordId, Appointment>,
    consultations: BTreeMap<RecordId, Consultation>,
    patients: HashMap<RecordId, PatientSummary>,
    doctors: HashMap<RecordId, DoctorSummary>,
    medical_records: Vec<MedicalRecord>,
    prescriptions: Vec<Prescription>,
}

impl MemoryState {
    fn next_appointment_id(&mut self) -> RecordId {
        self.appointment_seq += 1;
        self.appointment_seq
    }

    fn next_consultation_id(&mut self) -> RecordId {
        self.consultation_seq += 1;
        self.consultation_seq
    }
}

/// Every operation takes the single state lock for its whole duration, so
/// read-modify-write sequences (status transitions, uniqueness checks,
/// paired consultation/appointment writes) are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a patient profile so fallback-mode bookings can validate it.
    pub fn remember_patient(&self, patient: PatientSummary) {
        self.lock().patients.insert(patient.id, patient);
    }

    pub fn remember_doctor(&self, doctor: DoctorSummary) {
        self.lock().doctors.insert(doctor.id, doctor);
    }

    pub fn add_medical_record(&self, record: MedicalRecord) {
        self.lock().medical_records.push(record);
    }

    pub fn add_prescription(&self, prescription: Prescription) {
        self.lock().prescriptions.push(prescription);
    }

    pub fn appointment_count(&self) -> usize {
        self.lock().appointments.len()
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Fallback
    }

    async fn find_patient(&self, id: RecordId) -> Result<Option<PatientSummary>, AppointmentError> {
        Ok(self.lock().patients.get(&id).cloned())
    }

    async fn find_doctor(&self, id: RecordId) -> Result<Option<DoctorSummary>, AppointmentError> {
        Ok(self.lock().doctors.get(&id).cloned())
    }

    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<PatientSummary>, AppointmentError> {
        Ok(self.lock().patients.values().find(|p| p.user_id == Some(user_id)).cloned())
    }

    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError> {
        Ok(self.lock().doctors.values().find(|d| d.user_id == Some(user_id)).cloned())
    }

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        let mut state = self.lock();
        let id = state.next_appointment_id();
        let created = appointment.into_appointment(id);
        state.appointments.insert(id, created.clone());

        debug!("Fallback store created appointment {}", id);
        Ok(created)
    }

    async fn get_appointment(&self, id: RecordId) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.lock().appointments.get(&id).cloned())
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let state = self.lock();
        let mut appointments: Vec<Appointment> = state.appointments
            .values()
            .filter(|apt| filter.matches(apt))
            .cloned()
            .collect();

        appointments.sort_by(|a, b| {
            (a.appointment_date, a.appointment_time, a.id).cmp(&(b.appointment_date, b.appointment_time, b.id))
        });
        if filter.order == SortOrder::Descending {
            appointments.reverse();
        }

        Ok(appointments)
    }

    async fn update_appointment(
        &self,
        id: RecordId,
        patch: AppointmentPatch,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut state = self.lock();
        Ok(state.appointments.get_mut(&id).map(|appointment| {
            patch.apply_to(appointment);
            appointment.clone()
        }))
    }

    async fn transition_appointment(
        &self,
        id: RecordId,
        to: AppointmentStatus,
        only_from: Option<AppointmentStatus>,
        at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut state = self.lock();
        let Some(appointment) = state.appointments.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(expected) = only_from {
            if appointment.status != expected {
                return Ok(None);
            }
        }

        appointment.status = to;
        appointment.updated_at = at;
        Ok(Some(appointment.clone()))
    }

    async fn find_overdue_appointments(&self, now: NaiveDateTime) -> Result<Vec<Appointment>, AppointmentError> {
        let state = self.lock();
        let mut overdue: Vec<Appointment> = state.appointments
            .values()
            .filter(|apt| apt.is_overdue_at(now))
            .cloned()
            .collect();

        overdue.sort_by_key(|apt| (apt.appointment_date, apt.appointment_time, apt.id));
        Ok(overdue)
    }

    async fn insert_consultation(&self, consultation: NewConsultation) -> Result<Consultation, AppointmentError> {
        let mut state = self.lock();

        if state.consultations.values().any(|c| c.appointment_id == consultation.appointment_id) {
            return Err(AppointmentError::Conflict(
                "consultation already exists for appointment".to_string(),
            ));
        }

        let id = state.next_consultation_id();
        let created = consultation.into_consultation(id);
        state.consultations.insert(id, created.clone());

        debug!("Fallback store created consultation {}", id);
        Ok(created)
    }

    async fn get_consultation(&self, id: RecordId) -> Result<Option<Consultation>, AppointmentError> {
        Ok(self.lock().consultations.get(&id).cloned())
    }

    async fn get_consultation_by_appointment(
        &self,
        appointment_id: RecordId,
    ) -> Result<Option<Consultation>, AppointmentError> {
        Ok(self.lock()
            .consultations
            .values()
            .find(|c| c.appointment_id == appointment_id)
            .cloned())
    }

    async fn list_consultations(&self, filter: &ConsultationFilter) -> Result<Vec<Consultation>, AppointmentError> {
        let state = self.lock();
        let mut consultations: Vec<Consultation> = state.consultations
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();

        consultations.sort_by(|a, b| {
            (b.actual_start_time, b.id).cmp(&(a.actual_start_time, a.id))
        });
        Ok(consultations)
    }

    async fn finish_consultation(
        &self,
        id: RecordId,
        outcome: ConsultationOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<Consultation>, AppointmentError> {
        let mut state = self.lock();

        let Some(appointment_id) = state.consultations.get(&id).map(|c| c.appointment_id) else {
            return Ok(None);
        };

        // Both rows are checked before either is written.
        if !state.appointments.contains_key(&appointment_id) {
            return Err(AppointmentError::NotFound("appointment".to_string()));
        }

        if let Some(appointment) = state.appointments.get_mut(&appointment_id) {
            appointment.status = outcome.appointment_status();
            appointment.updated_at = at;
        }

        Ok(state.consultations.get_mut(&id).map(|consultation| {
            consultation.status = outcome.consultation_status();
            if outcome == ConsultationOutcome::Completed {
                consultation.actual_end_time = Some(at);
            }
            consultation.updated_at = at;
            consultation.clone()
        }))
    }

    async fn medical_records_for(&self, consultation_id: RecordId) -> Result<Vec<MedicalRecord>, AppointmentError> {
        Ok(self.lock()
            .medical_records
            .iter()
            .filter(|r| r.consultation_id == consultation_id)
            .cloned()
            .collect())
    }

    async fn prescriptions_for(&self, consultation_id: RecordId) -> Result<Vec<Prescription>, AppointmentError> {
        Ok(self.lock()
            .prescriptions
            .iter()
            .filter(|p| p.consultation_id == consultation_id)
            .cloned()
            .collect())
    }
}
