use identity_service::{
    build_router,
    config::{IdentityConfig, StorageBackend},
    db,
    services::{Database, RedisCoordinator, TracingAuditSink},
    AppState, Stores,
};
use service_core::error::AppError;
use service_core::observability::{logging::init_tracing, metrics::init_metrics};
use service_core::retry::{retry_async, RetryConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        backend = ?config.storage.backend,
        id_generation = ?config.id_generation.mode,
        "Starting identity service"
    );

    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN not set; API routes accept unauthenticated callers");
    }

    let stores = connect(&config).await?;
    let state = AppState::new(config.clone(), &stores, Arc::new(TracingAuditSink));

    state.authorization.bootstrap().await?;

    let shutdown = CancellationToken::new();
    let replenisher = if state.ids.is_random() {
        tracing::info!("Random id generation, replenisher not started");
        None
    } else {
        Some(stores.replenisher(&config).spawn(shutdown.clone()))
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(handle) = replenisher {
        let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Id replenisher task failed"),
            Err(_) => tracing::warn!("Id replenisher did not stop within the grace period"),
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn connect(config: &IdentityConfig) -> Result<Stores, AppError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is per-process and lost on restart");
            Ok(Stores::memory(config.id_generation.queue_capacity))
        }
        StorageBackend::Postgres => {
            let database = config.storage.database.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("postgres backend needs DATABASE_URL"))
            })?;
            let redis = config.storage.redis.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("postgres backend needs REDIS_URL"))
            })?;

            let retry = RetryConfig::with_max_attempts(5);
            let pool = retry_async(&retry, "postgres_connect", |_| true, || {
                db::create_pool(database)
            })
            .await?;
            db::run_migrations(&pool).await?;

            let coordinator = retry_async(&retry, "redis_connect", |_| true, || {
                RedisCoordinator::new(redis, config.id_generation.queue_capacity)
            })
            .await?;

            Ok(Stores::postgres(Database::new(pool), coordinator))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
