// libs/appointment-cell/src/services/mod.rs

pub mod access;
pub mod appointments;
pub mod clock;
pub mod consultations;
pub mod durable;
pub mod fallback;
pub mod memory;
pub mod scheduler;
pub mod store;

pub use access::{can_mutate, can_view, Actor, ActorResolver, CareParticipants};
pub use appointments::{AppointmentRepository, MissedSweep};
pub use clock::{Clock, FixedClock, SystemClock};
pub use consultations::ConsultationRepository;
pub use durable::SupabaseStore;
pub use fallback::StorageBackends;
pub use memory::MemoryStore;
pub use scheduler::{MissedAppointmentScheduler, SchedulerStatus, SweepSummary};
pub use store::{Backend, ClinicStore};
