//! Test helpers for identity-service integration tests.
//!
//! Builds application state over in-memory stores, or over PostgreSQL and
//! Redis when `TEST_DATABASE_URL` and `TEST_REDIS_URL` are set.

#![allow(dead_code)]

use identity_service::{
    build_router,
    config::{DatabaseConfig, IdGenerationMode, IdentityConfig, RedisConfig},
    db,
    services::{Database, RecordingAuditSink, RedisCoordinator},
    AppState, Stores,
};
use service_core::axum::Router;
use std::sync::Arc;

pub struct TestApp {
    pub state: AppState,
    pub stores: Stores,
    pub audit: Arc<RecordingAuditSink>,
}

impl TestApp {
    /// In-memory state with random id generation.
    pub async fn memory() -> Self {
        Self::memory_with(IdGenerationMode::Random).await
    }

    pub async fn memory_with(mode: IdGenerationMode) -> Self {
        Self::memory_config(mode, None).await
    }

    /// In-memory state whose API requires `token`.
    pub async fn memory_with_token(token: &str) -> Self {
        Self::memory_config(IdGenerationMode::Random, Some(token.to_string())).await
    }

    async fn memory_config(mode: IdGenerationMode, api_token: Option<String>) -> Self {
        let mut config = IdentityConfig::in_memory();
        config.id_generation.mode = mode;
        config.id_generation.partitions = 16;
        config.id_generation.acquire_timeout_ms = 500;
        config.api_token = api_token;
        let stores = Stores::memory(config.id_generation.queue_capacity);
        Self::build(config, stores).await
    }

    /// PostgreSQL and Redis state, or `None` when they are not configured.
    pub async fn postgres() -> Option<Self> {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let redis_url = std::env::var("TEST_REDIS_URL").ok()?;

        let database = DatabaseConfig {
            url: database_url,
            max_connections: 5,
            min_connections: 1,
        };
        let pool = db::create_pool(&database)
            .await
            .expect("Failed to connect to PostgreSQL");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        sqlx::query(
            "TRUNCATE id_ranges, name_reservations, principals, principal_trees, permissions",
        )
        .execute(&pool)
        .await
        .expect("Failed to truncate tables");

        let client = redis::Client::open(redis_url.clone()).expect("Invalid Redis URL");
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");
        let _: () = redis::cmd("DEL")
            .arg("identity:ids")
            .arg("identity:lock:id-generation")
            .query_async(&mut conn)
            .await
            .expect("Failed to clear Redis keys");

        let mut config = IdentityConfig::in_memory();
        config.id_generation.partitions = 16;
        config.id_generation.acquire_timeout_ms = 2_000;

        let redis = RedisCoordinator::new(
            &RedisConfig { url: redis_url },
            config.id_generation.queue_capacity,
        )
        .await
        .expect("Failed to connect to Redis");

        let stores = Stores::postgres(Database::new(pool), redis);
        Some(Self::build(config, stores).await)
    }

    async fn build(config: IdentityConfig, stores: Stores) -> Self {
        let audit = Arc::new(RecordingAuditSink::new());
        let state = AppState::new(config, &stores, audit.clone());
        state
            .authorization
            .bootstrap()
            .await
            .expect("Failed to bootstrap system principals");
        Self {
            state,
            stores,
            audit,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}
