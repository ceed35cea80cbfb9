use service_core::axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::AppState;

/// Require `Authorization: Bearer <API_TOKEN>` when a token is configured.
pub async fn service_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(presented) = presented else {
        tracing::warn!(path = %req.uri().path(), "Request without service credentials");
        return Err(AppError::AuthError(anyhow::anyhow!(
            "Missing or invalid Authorization header"
        )));
    };

    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!(path = %req.uri().path(), "Request with wrong service credentials");
        return Err(AppError::AuthError(anyhow::anyhow!("Invalid service token")));
    }

    Ok(next.run(req).await)
}
