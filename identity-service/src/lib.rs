//! Identity Service - identifier allocation, name reservation and
//! hierarchical authorization.

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use service_core::axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::IdentityConfig;
use crate::middleware::service_auth::service_auth_middleware;
use crate::services::{
    AuditSink, AuthorizationEngine, ClusterLock, Database, HealthCheck, IdAllocator, IdQueue,
    IdReplenisher, MemoryCoordinator, MemoryStore, MembershipStore, NameReservationService,
    PermissionStore, PrincipalDirectory, RangeStore, RedisCoordinator, ReservationStore,
};

/// Storage and coordination backends, behind their traits.
#[derive(Clone)]
pub struct Stores {
    pub ranges: Arc<dyn RangeStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub principals: Arc<dyn PrincipalDirectory>,
    pub lock: Arc<dyn ClusterLock>,
    pub queue: Arc<dyn IdQueue>,
    pub health: Vec<(&'static str, Arc<dyn HealthCheck>)>,
}

impl Stores {
    /// Everything in process memory. Only coherent within a single process.
    pub fn memory(queue_capacity: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(MemoryCoordinator::new(queue_capacity));
        Self {
            ranges: store.clone(),
            reservations: store.clone(),
            permissions: store.clone(),
            memberships: store.clone(),
            principals: store.clone(),
            lock: coordinator.clone(),
            queue: coordinator.clone(),
            health: vec![("memory", store), ("coordinator", coordinator)],
        }
    }

    /// Postgres for durable state, Redis for the cluster lock and id queue.
    pub fn postgres(db: Database, redis: RedisCoordinator) -> Self {
        let db = Arc::new(db);
        let redis = Arc::new(redis);
        Self {
            ranges: db.clone(),
            reservations: db.clone(),
            permissions: db.clone(),
            memberships: db.clone(),
            principals: db.clone(),
            lock: redis.clone(),
            queue: redis.clone(),
            health: vec![("postgresql", db), ("redis", redis)],
        }
    }

    /// Replenisher feeding this backend's id queue.
    pub fn replenisher(&self, config: &IdentityConfig) -> IdReplenisher {
        IdReplenisher::new(
            self.ranges.clone(),
            self.lock.clone(),
            self.queue.clone(),
            config.id_generation.clone(),
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub ids: Arc<IdAllocator>,
    pub reservations: Arc<NameReservationService>,
    pub authorization: Arc<AuthorizationEngine>,
    pub health: Vec<(&'static str, Arc<dyn HealthCheck>)>,
}

impl AppState {
    pub fn new(config: IdentityConfig, stores: &Stores, audit: Arc<dyn AuditSink>) -> Self {
        let ids = Arc::new(IdAllocator::new(&config.id_generation, stores.queue.clone()));
        let reservations = Arc::new(NameReservationService::new(
            stores.reservations.clone(),
            ids.clone(),
            config.reservation.retry_config(),
        ));
        let authorization = Arc::new(AuthorizationEngine::new(
            stores.permissions.clone(),
            stores.memberships.clone(),
            stores.principals.clone(),
            reservations.clone(),
            ids.clone(),
            audit,
        ));
        Self {
            config,
            ids,
            reservations,
            authorization,
            health: stores.health.clone(),
        }
    }
}

/// `/health` and `/metrics` are open. Every other route requires the
/// configured service token; callers are trusted services, and per-user
/// authorization is theirs to enforce with `/permissions/check`.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/ids", post(handlers::ids::allocate_ids))
        .route(
            "/reservations/:name",
            get(handlers::reservations::get_reservation)
                .patch(handlers::reservations::rename_reservation)
                .delete(handlers::reservations::release_reservation),
        )
        .route(
            "/reservations/by-id/:id",
            get(handlers::reservations::get_reservation_name),
        )
        .route("/principals", post(handlers::principals::create_principal))
        .route(
            "/principals/memberships",
            post(handlers::principals::add_membership)
                .delete(handlers::principals::remove_membership),
        )
        .route(
            "/principals/:principal_type/:id",
            get(handlers::principals::get_principal)
                .patch(handlers::principals::update_principal)
                .delete(handlers::principals::delete_principal),
        )
        .route(
            "/principals/:principal_type/:id/closure",
            get(handlers::principals::get_closure),
        )
        .route("/permissions/grant", post(handlers::permissions::grant))
        .route("/permissions/revoke", post(handlers::permissions::revoke))
        .route("/permissions/check", post(handlers::permissions::check))
        .route("/permissions/query", post(handlers::permissions::query))
        .route_layer(from_fn_with_state(state.clone(), service_auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(protected)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut checks = serde_json::Map::new();
    for (name, check) in &state.health {
        check.health_check().await.map_err(|e| {
            tracing::error!(check = name, error = %e, "Health check failed");
            AppError::ServiceUnavailable(format!("{} is unavailable", name))
        })?;
        checks.insert(name.to_string(), serde_json::json!("up"));
    }

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "id_generation": format!("{:?}", state.config.id_generation.mode),
        "checks": checks,
    })))
}
