// libs/appointment-cell/src/services/access.rs
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentDetails, AppointmentError, Consultation, ConsultationDetails, RecordId,
};
use crate::services::fallback::{profile_unavailable, StorageBackends};
use crate::services::store::Backend;

/// Who is asking, in terms of the clinic's own records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin,
    Doctor { doctor_id: RecordId },
    Patient { patient_id: RecordId },
    Anonymous,
}

/// Records that belong to one doctor and one patient.
pub trait CareParticipants {
    fn doctor_id(&self) -> RecordId;

    fn patient_id(&self) -> RecordId;
}

impl CareParticipants for Appointment {
    fn doctor_id(&self) -> RecordId {
        self.doctor_id
    }

    fn patient_id(&self) -> RecordId {
        self.patient_id
    }
}

impl CareParticipants for Consultation {
    fn doctor_id(&self) -> RecordId {
        self.doctor_id
    }

    fn patient_id(&self) -> RecordId {
        self.patient_id
    }
}

impl CareParticipants for AppointmentDetails {
    fn doctor_id(&self) -> RecordId {
        self.appointment.doctor_id
    }

    fn patient_id(&self) -> RecordId {
        self.appointment.patient_id
    }
}

impl CareParticipants for ConsultationDetails {
    fn doctor_id(&self) -> RecordId {
        self.consultation.doctor_id
    }

    fn patient_id(&self) -> RecordId {
        self.consultation.patient_id
    }
}

fn is_participant<R: CareParticipants + ?Sized>(actor: &Actor, record: &R) -> bool {
    match actor {
        Actor::Admin => true,
        Actor::Doctor { doctor_id } => record.doctor_id() == *doctor_id,
        Actor::Patient { patient_id } => record.patient_id() == *patient_id,
        Actor::Anonymous => false,
    }
}

pub fn can_view<R: CareParticipants + ?Sized>(actor: &Actor, record: &R) -> bool {
    is_participant(actor, record)
}

pub fn can_mutate<R: CareParticipants + ?Sized>(actor: &Actor, record: &R) -> bool {
    is_participant(actor, record)
}

/// Maps an authenticated user onto the doctor or patient profile they own.
pub struct ActorResolver {
    backends: Arc<StorageBackends>,
}

impl ActorResolver {
    pub fn new(backends: Arc<StorageBackends>) -> Self {
        Self { backends }
    }

    pub async fn resolve(&self, user: &User) -> Result<Actor, AppointmentError> {
        if user.is_admin() {
            return Ok(Actor::Admin);
        }

        let Ok(user_id) = Uuid::parse_str(&user.id) else {
            warn!("User id {} is not a UUID, treating as anonymous", user.id);
            return Ok(Actor::Anonymous);
        };

        let actor = match user.role.as_deref() {
            Some("doctor") => {
                let (doctor, served_by) = self.backends
                    .run_on("find_doctor_by_user", |store| async move { store.find_doctor_by_user(user_id).await })
                    .await?;
                if doctor.is_none() && served_by == Backend::Fallback {
                    return Err(profile_unavailable("doctor for user", user_id));
                }
                doctor.map(|doctor| {
                    self.backends.remember_doctor(&doctor);
                    Actor::Doctor { doctor_id: doctor.id }
                })
            }
            Some("patient") => {
                let (patient, served_by) = self.backends
                    .run_on("find_patient_by_user", |store| async move { store.find_patient_by_user(user_id).await })
                    .await?;
                if patient.is_none() && served_by == Backend::Fallback {
                    return Err(profile_unavailable("patient for user", user_id));
                }
                patient.map(|patient| {
                    self.backends.remember_patient(&patient);
                    Actor::Patient { patient_id: patient.id }
                })
            }
            _ => None,
        };

        let actor = actor.unwrap_or(Actor::Anonymous);
        debug!("Resolved user {} to {:?}", user.id, actor);
        Ok(actor)
    }
}
