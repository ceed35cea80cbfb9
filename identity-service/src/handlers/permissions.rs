//! Grant, revoke, check and query handlers.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Ace, AceQuery, AclKey, PermissionSet, Principal, SecurableObjectType};
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub acl_key: AclKey,
    pub principal: Principal,
    pub permissions: PermissionSet,
    #[serde(default = "unknown_object_type")]
    pub securable_object_type: SecurableObjectType,
    /// Omitted means the grant never expires.
    pub expiration_date: Option<DateTime<Utc>>,
}

fn unknown_object_type() -> SecurableObjectType {
    SecurableObjectType::Unknown
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub acl_key: AclKey,
    pub principal: Principal,
    pub permissions: PermissionSet,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    pub principal: Principal,
    #[validate(length(min = 1, max = 1000, message = "acl_keys must hold 1 to 1000 keys"))]
    pub acl_keys: Vec<AclKey>,
    /// When set, each result also reports whether all of these are held.
    pub required: Option<PermissionSet>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub acl_key: AclKey,
    pub permissions: PermissionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub principal: Principal,
    pub results: Vec<CheckResult>,
}

fn require_permissions(permissions: PermissionSet) -> Result<(), AppError> {
    if permissions.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "At least one permission must be given"
        )));
    }
    Ok(())
}

/// POST /permissions/grant
#[tracing::instrument(skip(state, request), fields(acl_key = %request.acl_key, principal = %request.principal))]
pub async fn grant(
    State(state): State<AppState>,
    Json(request): Json<GrantRequest>,
) -> Result<StatusCode, AppError> {
    require_permissions(request.permissions)?;

    state
        .authorization
        .grant(
            &request.acl_key,
            &request.principal,
            request.permissions,
            request.securable_object_type,
            request.expiration_date,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /permissions/revoke
#[tracing::instrument(skip(state, request), fields(acl_key = %request.acl_key, principal = %request.principal))]
pub async fn revoke(
    State(state): State<AppState>,
    Json(request): Json<RevokeRequest>,
) -> Result<StatusCode, AppError> {
    require_permissions(request.permissions)?;

    state
        .authorization
        .revoke(&request.acl_key, &request.principal, request.permissions)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Effective permissions of a principal, inheritance and expiry applied.
///
/// POST /permissions/check
pub async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    request.validate()?;

    let held = state
        .authorization
        .get_permissions(&request.principal, &request.acl_keys)
        .await?;

    let results = request
        .acl_keys
        .into_iter()
        .map(|acl_key| {
            let permissions = held.get(&acl_key).copied().unwrap_or_default();
            CheckResult {
                granted: request.required.map(|r| permissions.contains_all(r)),
                acl_key,
                permissions,
            }
        })
        .collect();

    Ok(Json(CheckResponse {
        principal: request.principal,
        results,
    }))
}

/// POST /permissions/query
pub async fn query(
    State(state): State<AppState>,
    Json(query): Json<AceQuery>,
) -> Result<Json<Vec<Ace>>, AppError> {
    Ok(Json(state.authorization.query(&query).await?))
}
