use service_core::error::AppError;
use thiserror::Error;

/// Errors raised by the storage and coordination backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Name already reserved: {0}")]
    NameTaken(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bounded retries exhausted; the caller should pick a different name.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("No identifier available: {0}")]
    IdUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(StoreError::Database(e)) => {
                AppError::DatabaseError(anyhow::anyhow!(e))
            }
            ServiceError::Store(StoreError::Redis(e)) => AppError::RedisError(e),
            ServiceError::Store(StoreError::NameTaken(name)) => {
                AppError::Conflict(anyhow::anyhow!("Name already reserved: {}", name))
            }
            ServiceError::Store(e @ StoreError::Corrupt(_))
            | ServiceError::Store(e @ StoreError::Internal(_)) => {
                AppError::InternalError(anyhow::anyhow!(e))
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::IllegalState(e) => AppError::Conflict(anyhow::anyhow!(
                "{}; try again with a different name",
                e
            )),
            ServiceError::IdUnavailable(e) => AppError::ServiceUnavailable(e),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}
