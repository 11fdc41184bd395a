// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{
    ActorResolver, AppointmentRepository, Clock, ConsultationRepository,
    MissedAppointmentScheduler, StorageBackends,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub appointments: Arc<AppointmentRepository>,
    pub consultations: Arc<ConsultationRepository>,
    pub scheduler: Arc<MissedAppointmentScheduler>,
    pub actors: Arc<ActorResolver>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, backends: Arc<StorageBackends>, clock: Arc<dyn Clock>) -> Self {
        let appointments = Arc::new(AppointmentRepository::new(Arc::clone(&backends), Arc::clone(&clock)));
        let consultations = Arc::new(ConsultationRepository::new(Arc::clone(&backends), clock));
        let scheduler = Arc::new(MissedAppointmentScheduler::new(Arc::clone(&appointments)));
        let actors = Arc::new(ActorResolver::new(backends));

        Self { config, appointments, consultations, scheduler, actors }
    }
}

pub fn appointment_routes(state: AppState) -> Router {
    // Every route requires a valid Supabase JWT
    let protected_routes = Router::new()
        // Administration
        .route("/missed/sweep", post(handlers::run_missed_sweep))
        .route("/scheduler/status", get(handlers::get_scheduler_status))

        // Appointment access
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))

        // Consultations
        .route("/consultations/{consultation_id}/complete", post(handlers::complete_consultation))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
