// libs/appointment-cell/src/lib.rs
//! # Appointment Cell
//!
//! Appointment and consultation lifecycle for the telehealth backend.
//!
//! ```text
//! +-----------------------------------------------------------+
//! |                    Appointment Cell                       |
//! +-----------------------------------------------------------+
//! |  models.rs          |  Entities, requests, errors          |
//! |  services/          |                                      |
//! |    store.rs         |  Storage interface                   |
//! |    durable.rs       |  Supabase (PostgREST) backend        |
//! |    memory.rs        |  In-process fallback backend         |
//! |    fallback.rs      |  Durable-then-fallback routing       |
//! |    appointments.rs  |  Appointment repository              |
//! |    consultations.rs |  Consultation repository             |
//! |    scheduler.rs     |  Missed-appointment sweeps           |
//! |    access.rs        |  View / mutate predicates            |
//! |  handlers.rs        |  HTTP handlers                       |
//! |  router.rs          |  Route definitions                   |
//! +-----------------------------------------------------------+
//! ```
//!
//! Every storage call goes to Supabase first. When Supabase cannot be
//! reached the same call is served by the in-process store instead; data
//! written there is not copied back once Supabase recovers.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Appointment, AppointmentDetails, AppointmentError, AppointmentStatus, AppointmentType,
    Consultation, ConsultationDetails, ConsultationStatus, CreateAppointmentRequest,
    UpdateAppointmentRequest,
};

pub use services::{
    AppointmentRepository, ConsultationRepository, MissedAppointmentScheduler, StorageBackends,
};

pub use router::{appointment_routes, AppState};
