use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::Reservation;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct RenameReservationRequest {
    #[validate(length(min = 1, max = 512, message = "new_name must be 1 to 512 characters"))]
    pub new_name: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationNameResponse {
    pub id: Uuid,
    pub name: String,
}

/// GET /reservations/:name
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    state
        .reservations
        .get_reservation(&name)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No reservation for '{}'", name)))
}

/// GET /reservations/by-id/:id
pub async fn get_reservation_name(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationNameResponse>, AppError> {
    let name = state
        .reservations
        .get_name(id.into())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No reservation for id {}", id)))?;
    Ok(Json(ReservationNameResponse { id, name }))
}

/// Rename a reservation. Renaming a missing reservation is a no-op.
///
/// PATCH /reservations/:name
#[tracing::instrument(skip(state, request))]
pub async fn rename_reservation(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RenameReservationRequest>,
) -> Result<StatusCode, AppError> {
    request.validate()?;

    state
        .reservations
        .rename(&name, &request.new_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /reservations/:name
#[tracing::instrument(skip(state))]
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.reservations.release_by_name(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
