use axum::{
    Router,
    routing::get,
    extract::State,
    Json,
};
use serde_json::{json, Value};

use appointment_cell::router::{appointment_routes, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Telehealth API is running!" }))
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/appointments", appointment_routes(state))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let degraded = state.appointments.backends().is_degraded();

    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "storage": if degraded { "fallback" } else { "durable" },
        "scheduler_running": state.scheduler.is_running()
    }))
}
