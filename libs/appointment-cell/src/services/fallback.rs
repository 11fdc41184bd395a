// libs/appointment-cell/src/services/fallback.rs
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

use crate::models::{AppointmentError, DoctorSummary, PatientSummary, RecordId};
use crate::services::durable::SupabaseStore;
use crate::services::memory::MemoryStore;
use crate::services::store::{Backend, ClinicStore};

/// The durable store plus the in-process fallback. Repositories route every
/// storage call through [`StorageBackends::run`].
pub struct StorageBackends {
    durable: Arc<dyn ClinicStore>,
    fallback: Arc<MemoryStore>,
    fallback_enabled: bool,
    degraded: AtomicBool,
}

impl StorageBackends {
    pub fn new(durable: Arc<dyn ClinicStore>, fallback: Arc<MemoryStore>) -> Self {
        Self {
            durable,
            fallback,
            fallback_enabled: true,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let durable: Arc<dyn ClinicStore> = Arc::new(SupabaseStore::new(config));
        Self {
            fallback_enabled: config.fallback_store_enabled,
            ..Self::new(durable, Arc::new(MemoryStore::new()))
        }
    }

    /// Connectivity failures surface as `StorageFailure` instead of being
    /// retried on the fallback.
    pub fn without_fallback(durable: Arc<dyn ClinicStore>) -> Self {
        Self {
            fallback_enabled: false,
            ..Self::new(durable, Arc::new(MemoryStore::new()))
        }
    }

    pub fn fallback(&self) -> &Arc<MemoryStore> {
        &self.fallback
    }

    /// True while the most recent storage call was served by the fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Run `call` against the durable store; on a connectivity failure run
    /// it once more against the fallback. Any other outcome is returned
    /// unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, AppointmentError>
    where
        F: Fn(Arc<dyn ClinicStore>) -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        self.run_on(operation, call).await.map(|(value, _)| value)
    }

    /// Like [`run`](Self::run), also reporting which backend produced the value.
    pub async fn run_on<T, F, Fut>(&self, operation: &str, call: F) -> Result<(T, Backend), AppointmentError>
    where
        F: Fn(Arc<dyn ClinicStore>) -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        let reason = match call(Arc::clone(&self.durable)).await {
            Err(AppointmentError::Connectivity(reason)) => reason,
            other => {
                self.degraded.store(false, Ordering::Relaxed);
                return other.map(|value| (value, Backend::Durable));
            }
        };

        if !self.fallback_enabled {
            error!("{} failed, durable backend unreachable and fallback disabled: {}", operation, reason);
            return Err(AppointmentError::StorageFailure(reason));
        }

        warn!("{}: durable backend unreachable ({}), using {} store", operation, reason, Backend::Fallback);
        self.degraded.store(true, Ordering::Relaxed);

        let fallback: Arc<dyn ClinicStore> = self.fallback.clone();
        call(fallback)
            .await
            .map(|value| (value, Backend::Fallback))
            .map_err(|e| match e {
                AppointmentError::Connectivity(reason) => AppointmentError::StorageFailure(reason),
                other => other,
            })
    }

    pub async fn find_patient(&self, id: RecordId) -> Result<Option<PatientSummary>, AppointmentError> {
        Ok(self.lookup_patient(id).await?.0)
    }

    pub async fn find_doctor(&self, id: RecordId) -> Result<Option<DoctorSummary>, AppointmentError> {
        Ok(self.lookup_doctor(id).await?.0)
    }

    /// The patient must exist. A miss in the fallback directory only means
    /// the profile was never seen by this process, so it is reported as a
    /// storage failure rather than `NotFound`.
    pub async fn require_patient(&self, id: RecordId) -> Result<PatientSummary, AppointmentError> {
        match self.lookup_patient(id).await? {
            (Some(patient), _) => Ok(patient),
            (None, Backend::Durable) => Err(AppointmentError::NotFound("patient".to_string())),
            (None, Backend::Fallback) => Err(profile_unavailable("patient", id)),
        }
    }

    pub async fn require_doctor(&self, id: RecordId) -> Result<DoctorSummary, AppointmentError> {
        match self.lookup_doctor(id).await? {
            (Some(doctor), _) => Ok(doctor),
            (None, Backend::Durable) => Err(AppointmentError::NotFound("doctor".to_string())),
            (None, Backend::Fallback) => Err(profile_unavailable("doctor", id)),
        }
    }

    async fn lookup_patient(&self, id: RecordId) -> Result<(Option<PatientSummary>, Backend), AppointmentError> {
        let (patient, served_by) = self
            .run_on("find_patient", |store| async move { store.find_patient(id).await })
            .await?;
        if let Some(patient) = &patient {
            self.remember_patient(patient);
        }
        Ok((patient, served_by))
    }

    async fn lookup_doctor(&self, id: RecordId) -> Result<(Option<DoctorSummary>, Backend), AppointmentError> {
        let (doctor, served_by) = self
            .run_on("find_doctor", |store| async move { store.find_doctor(id).await })
            .await?;
        if let Some(doctor) = &doctor {
            self.remember_doctor(doctor);
        }
        Ok((doctor, served_by))
    }

    /// Keep profiles resolved from storage available to fallback-mode
    /// bookings. Only reference data is copied.
    pub fn remember_patient(&self, patient: &PatientSummary) {
        debug!("Remembering patient {} for fallback lookups", patient.id);
        self.fallback.remember_patient(patient.clone());
    }

    pub fn remember_doctor(&self, doctor: &DoctorSummary) {
        debug!("Remembering doctor {} for fallback lookups", doctor.id);
        self.fallback.remember_doctor(doctor.clone());
    }
}

pub(crate) fn profile_unavailable(kind: &str, id: impl std::fmt::Display) -> AppointmentError {
    AppointmentError::StorageFailure(format!("{} {} unavailable while degraded", kind, id))
}
