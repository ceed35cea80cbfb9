use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Bearer token callers present on every route except health and
    /// metrics. Unset disables the check (dev only).
    pub api_token: Option<String>,
    pub storage: StorageConfig,
    pub id_generation: IdGenerationConfig,
    pub reservation: ReservationConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// PostgreSQL for records, Redis for the cluster lock and id queue.
    Postgres,
    /// Everything in-process. Single node only.
    Memory,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdGenerationMode {
    /// Cluster-coordinated allocation from partitioned ranges.
    Partitioned,
    /// Random 128-bit identifiers, for environments without a cluster.
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdGenerationConfig {
    pub mode: IdGenerationMode,
    /// Number of active partitions, at most 65,536.
    pub partitions: u32,
    /// Identifiers minted per partition per replenishment round.
    pub scroll_size: u64,
    /// Soft capacity of the shared prefetch queue.
    pub queue_capacity: usize,
    pub acquire_timeout_ms: u64,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
}

impl IdGenerationConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

impl Default for IdGenerationConfig {
    fn default() -> Self {
        Self {
            mode: IdGenerationMode::Partitioned,
            partitions: 1024,
            scroll_size: 5,
            queue_capacity: 10_000,
            acquire_timeout_ms: 5_000,
            lock_ttl_ms: 10_000,
            lock_wait_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub max_attempts: u32,
    /// Zero disables backoff between conflicting attempts.
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl ReservationConfig {
    pub fn retry_config(&self) -> service_core::retry::RetryConfig {
        service_core::retry::RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: 2.0,
            add_jitter: self.initial_backoff_ms > 0,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let backend: StorageBackend = get_env("STORAGE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let (database, redis) = match backend {
            StorageBackend::Postgres => (
                Some(DatabaseConfig {
                    url: get_env("DATABASE_URL", None, is_prod)?,
                    max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                    min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
                }),
                Some(RedisConfig {
                    url: get_env("REDIS_URL", None, is_prod)?,
                }),
            ),
            StorageBackend::Memory => (None, None),
        };

        let defaults = IdGenerationConfig::default();
        let reservation_defaults = ReservationConfig::default();

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            api_token: env::var("API_TOKEN").ok().filter(|s| !s.is_empty()),
            storage: StorageConfig {
                backend,
                database,
                redis,
            },
            id_generation: IdGenerationConfig {
                mode: get_env("ID_GENERATION_MODE", Some("partitioned"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                partitions: parse_env("ID_PARTITIONS", &defaults.partitions.to_string())?,
                scroll_size: parse_env("ID_SCROLL_SIZE", &defaults.scroll_size.to_string())?,
                queue_capacity: parse_env(
                    "ID_QUEUE_CAPACITY",
                    &defaults.queue_capacity.to_string(),
                )?,
                acquire_timeout_ms: parse_env(
                    "ID_ACQUIRE_TIMEOUT_MS",
                    &defaults.acquire_timeout_ms.to_string(),
                )?,
                lock_ttl_ms: parse_env("ID_LOCK_TTL_MS", &defaults.lock_ttl_ms.to_string())?,
                lock_wait_ms: parse_env("ID_LOCK_WAIT_MS", &defaults.lock_wait_ms.to_string())?,
            },
            reservation: ReservationConfig {
                max_attempts: parse_env(
                    "RESERVATION_MAX_ATTEMPTS",
                    &reservation_defaults.max_attempts.to_string(),
                )?,
                initial_backoff_ms: parse_env(
                    "RESERVATION_INITIAL_BACKOFF_MS",
                    &reservation_defaults.initial_backoff_ms.to_string(),
                )?,
                max_backoff_ms: parse_env(
                    "RESERVATION_MAX_BACKOFF_MS",
                    &reservation_defaults.max_backoff_ms.to_string(),
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration for a single-process, in-memory deployment.
    pub fn in_memory() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            api_token: None,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database: None,
                redis: None,
            },
            id_generation: IdGenerationConfig::default(),
            reservation: ReservationConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let ids = &self.id_generation;
        if ids.partitions == 0 || ids.partitions > 65_536 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ID_PARTITIONS must be between 1 and 65536"
            )));
        }

        if ids.scroll_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ID_SCROLL_SIZE must be positive"
            )));
        }

        if ids.acquire_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ID_ACQUIRE_TIMEOUT_MS must be positive"
            )));
        }

        if self.reservation.max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RESERVATION_MAX_ATTEMPTS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.storage.backend == StorageBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "In-memory storage is not allowed in production"
                )));
            }

            if self.api_token.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "API_TOKEN is required in production"
                )));
            }

            if ids.mode == IdGenerationMode::Random {
                tracing::warn!("Random id generation is enabled in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

impl std::str::FromStr for IdGenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "partitioned" => Ok(IdGenerationMode::Partitioned),
            "random" => Ok(IdGenerationMode::Random),
            _ => Err(format!("Invalid id generation mode: {}", s)),
        }
    }
}
