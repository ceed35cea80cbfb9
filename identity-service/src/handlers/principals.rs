//! Principal lifecycle and membership handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AclKey, Principal, PrincipalType, SecurablePrincipalResponse};
use crate::services::authorization::system_principal;
use crate::services::NewPrincipal;
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePrincipalRequest {
    pub principal_type: PrincipalType,
    #[validate(length(min = 1, max = 256, message = "id must be 1 to 256 characters"))]
    pub id: String,
    #[validate(length(min = 1, max = 512, message = "title must be 1 to 512 characters"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// AclKey of the containing object. Roles live under their organization.
    pub parent: Option<AclKey>,
    /// Receives every permission on the new principal. Defaults to the
    /// system service.
    pub owner: Option<Principal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePrincipalRequest {
    #[validate(length(min = 1, max = 512, message = "title must be 1 to 512 characters"))]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub child: AclKey,
    pub parent: AclKey,
}

#[derive(Debug, Serialize)]
pub struct ClosureResponse {
    pub principal: Principal,
    pub closure: Vec<Principal>,
}

fn parse_principal(principal_type: &str, id: String) -> Result<Principal, AppError> {
    let principal_type: PrincipalType = principal_type
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;
    Ok(Principal::new(principal_type, id))
}

// ============================================================================
// Principal Handlers
// ============================================================================

/// Create a principal under a freshly reserved id.
///
/// POST /principals
#[tracing::instrument(skip(state, request), fields(id = %request.id))]
pub async fn create_principal(
    State(state): State<AppState>,
    Json(request): Json<CreatePrincipalRequest>,
) -> Result<(StatusCode, Json<SecurablePrincipalResponse>), AppError> {
    request.validate()?;

    if request.principal_type == PrincipalType::Role && request.parent.is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "A role must be created under an organization"
        )));
    }

    let owner = request.owner.unwrap_or_else(system_principal);
    let created = state
        .authorization
        .create_principal(
            &owner,
            NewPrincipal {
                principal: Principal::new(request.principal_type, request.id),
                title: request.title,
                description: request.description,
                parent: request.parent,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /principals/:principal_type/:id
pub async fn get_principal(
    State(state): State<AppState>,
    Path((principal_type, id)): Path<(String, String)>,
) -> Result<Json<SecurablePrincipalResponse>, AppError> {
    let principal = parse_principal(&principal_type, id)?;
    let found = state.authorization.lookup(&principal).await?;
    Ok(Json(found.into()))
}

/// PATCH /principals/:principal_type/:id
pub async fn update_principal(
    State(state): State<AppState>,
    Path((principal_type, id)): Path<(String, String)>,
    Json(request): Json<UpdatePrincipalRequest>,
) -> Result<StatusCode, AppError> {
    request.validate()?;

    let principal = parse_principal(&principal_type, id)?;
    state
        .authorization
        .update_title(&principal, &request.title)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /principals/:principal_type/:id
#[tracing::instrument(skip(state))]
pub async fn delete_principal(
    State(state): State<AppState>,
    Path((principal_type, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let principal = parse_principal(&principal_type, id)?;
    state.authorization.delete_principal(&principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Every principal the given one inherits from, itself included.
///
/// GET /principals/:principal_type/:id/closure
pub async fn get_closure(
    State(state): State<AppState>,
    Path((principal_type, id)): Path<(String, String)>,
) -> Result<Json<ClosureResponse>, AppError> {
    let principal = parse_principal(&principal_type, id)?;
    let closure = state.authorization.closure_of(&principal).await?;
    Ok(Json(ClosureResponse {
        principal,
        closure: closure.into_iter().collect(),
    }))
}

// ============================================================================
// Membership Handlers
// ============================================================================

/// POST /principals/memberships
#[tracing::instrument(skip(state, request))]
pub async fn add_membership(
    State(state): State<AppState>,
    Json(request): Json<MembershipRequest>,
) -> Result<StatusCode, AppError> {
    state
        .authorization
        .add_principal_to_principal(&request.child, &request.parent)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /principals/memberships
#[tracing::instrument(skip(state, request))]
pub async fn remove_membership(
    State(state): State<AppState>,
    Json(request): Json<MembershipRequest>,
) -> Result<StatusCode, AppError> {
    state
        .authorization
        .remove_principal_from_principal(&request.child, &request.parent)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
