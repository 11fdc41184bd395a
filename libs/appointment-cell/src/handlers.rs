// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Path, State, Extension},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_admin;

use crate::models::RecordId;
use crate::router::AppState;
use crate::services::access::{can_mutate, can_view, Actor};

// ==============================================================================
// ADMINISTRATION HANDLERS
// ==============================================================================

/// Run one missed-appointment sweep immediately (admin only)
#[axum::debug_handler]
pub async fn run_missed_sweep(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    info!("Manual missed appointment sweep requested by {}", user.id);

    let sweep = state.scheduler.run_once().await?;
    let failed_ids = sweep.failed_ids();

    Ok(Json(json!({
        "success": true,
        "missed_count": sweep.missed.len(),
        "appointments": sweep.missed,
        "failed_ids": failed_ids
    })))
}

#[axum::debug_handler]
pub async fn get_scheduler_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    Ok(Json(json!({
        "success": true,
        "scheduler": state.scheduler.status(),
        "degraded": state.appointments.backends().is_degraded()
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<RecordId>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = state.actors.resolve(&user).await?;

    let details = state.appointments.get_by_id(appointment_id).await?
        .ok_or_else(|| AppError::NotFound("Appointment not found".to_string()))?;

    if !can_view(&actor, &details) {
        warn!("User {} denied access to appointment {}", user.id, appointment_id);
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "appointment": details
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<RecordId>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = state.actors.resolve(&user).await?;

    let details = state.appointments.get_by_id(appointment_id).await?
        .ok_or_else(|| AppError::NotFound("Appointment not found".to_string()))?;

    if !can_mutate(&actor, &details) {
        return Err(AppError::Forbidden("Not authorized to cancel this appointment".to_string()));
    }

    let appointment = state.appointments.cancel(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

/// Complete a consultation and its appointment (treating doctor or admin)
#[axum::debug_handler]
pub async fn complete_consultation(
    State(state): State<AppState>,
    Path(consultation_id): Path<RecordId>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = state.actors.resolve(&user).await?;

    let consultation = state.consultations.get_consultation(consultation_id).await?
        .ok_or_else(|| AppError::NotFound("Consultation not found".to_string()))?;

    let is_clinician = matches!(actor, Actor::Admin | Actor::Doctor { .. });
    if !is_clinician || !can_mutate(&actor, &consultation) {
        return Err(AppError::Forbidden("Only the treating doctor can complete this consultation".to_string()));
    }

    let completed = state.consultations.complete_consultation(consultation_id).await?;

    Ok(Json(json!({
        "success": true,
        "consultation": completed,
        "message": "Consultation completed"
    })))
}
