use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Identifier;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct AllocateIdsRequest {
    #[validate(range(min = 1, max = 1000, message = "count must be between 1 and 1000"))]
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AllocateIdsResponse {
    pub ids: Vec<Identifier>,
}

/// Allocate fresh identifiers.
///
/// POST /ids
#[tracing::instrument(skip(state, request), fields(count = request.count))]
pub async fn allocate_ids(
    State(state): State<AppState>,
    Json(request): Json<AllocateIdsRequest>,
) -> Result<Json<AllocateIdsResponse>, AppError> {
    request.validate()?;

    let ids = state.ids.next_ids(request.count).await?;
    Ok(Json(AllocateIdsResponse {
        ids: ids.into_iter().collect(),
    }))
}
