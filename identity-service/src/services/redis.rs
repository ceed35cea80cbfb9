use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::StoreError;
use super::store::{ClusterLock, HealthCheck, IdQueue, LockToken};
use crate::models::Identifier;

const LOCK_KEY_PREFIX: &str = "identity:lock:";
const QUEUE_KEY: &str = "identity:ids";

/// Interval between queue polls. The connection manager multiplexes one
/// connection, so blocking pops would stall every other command.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed cluster lock and shared id queue.
#[derive(Clone)]
pub struct RedisCoordinator {
    _client: Client,
    manager: ConnectionManager,
    queue_capacity: usize,
}

impl RedisCoordinator {
    pub async fn new(
        config: &crate::config::RedisConfig,
        queue_capacity: usize,
    ) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            queue_capacity,
        })
    }
}

#[async_trait]
impl HealthCheck for RedisCoordinator {
    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterLock for RedisCoordinator {
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let mut conn = self.manager.clone();
        let key = format!("{}{}", LOCK_KEY_PREFIX, name);
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| LockToken {
            name: name.to_string(),
            token,
        }))
    }

    async fn unlock(&self, token: &LockToken) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let key = format!("{}{}", LOCK_KEY_PREFIX, token.name);

        let deleted: i64 = Script::new(UNLOCK_SCRIPT)
            .key(&key)
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }
}

#[async_trait]
impl IdQueue for RedisCoordinator {
    async fn push_all(&self, ids: &[Identifier], wait: Duration) -> Result<bool, StoreError> {
        if ids.is_empty() {
            return Ok(true);
        }

        let mut conn = self.manager.clone();
        let deadline = Instant::now() + wait;
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        loop {
            let len: usize = redis::cmd("LLEN")
                .arg(QUEUE_KEY)
                .query_async(&mut conn)
                .await?;

            // Soft capacity: a full batch may overshoot by up to its own size.
            if len < self.queue_capacity {
                redis::cmd("RPUSH")
                    .arg(QUEUE_KEY)
                    .arg(&values)
                    .query_async::<_, i64>(&mut conn)
                    .await?;
                return Ok(true);
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn pop(&self, wait: Duration) -> Result<Option<Identifier>, StoreError> {
        let mut conn = self.manager.clone();
        let deadline = Instant::now() + wait;

        loop {
            let value: Option<String> = redis::cmd("LPOP")
                .arg(QUEUE_KEY)
                .query_async(&mut conn)
                .await?;

            if let Some(value) = value {
                let uuid = Uuid::parse_str(&value).map_err(|e| {
                    StoreError::Corrupt(format!("invalid id in queue {}: {}", value, e))
                })?;
                return Ok(Some(Identifier::new(uuid)));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.manager.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(QUEUE_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Internal("coordinator lock poisoned".to_string())
}

/// Single-process stand-in for [`RedisCoordinator`].
pub struct MemoryCoordinator {
    locks: Mutex<HashMap<String, (String, Instant)>>,
    queue: Mutex<VecDeque<Identifier>>,
    queue_capacity: usize,
    items_available: Notify,
    space_available: Notify,
}

impl MemoryCoordinator {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity,
            items_available: Notify::new(),
            space_available: Notify::new(),
        }
    }
}

#[async_trait]
impl HealthCheck for MemoryCoordinator {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ClusterLock for MemoryCoordinator {
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        let now = Instant::now();

        if let Some((_, expires_at)) = locks.get(name) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = Uuid::new_v4().to_string();
        locks.insert(name.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockToken {
            name: name.to_string(),
            token,
        }))
    }

    async fn unlock(&self, token: &LockToken) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        let held = matches!(
            locks.get(&token.name),
            Some((current, expires_at)) if *current == token.token && *expires_at > Instant::now()
        );
        if held {
            locks.remove(&token.name);
        }
        Ok(held)
    }
}

#[async_trait]
impl IdQueue for MemoryCoordinator {
    async fn push_all(&self, ids: &[Identifier], wait: Duration) -> Result<bool, StoreError> {
        if ids.is_empty() {
            return Ok(true);
        }

        let deadline = Instant::now() + wait;
        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let pushed = {
                let mut queue = self.queue.lock().map_err(poisoned)?;
                if queue.len() < self.queue_capacity {
                    queue.extend(ids.iter().copied());
                    true
                } else {
                    false
                }
            };

            if pushed {
                self.items_available.notify_waiters();
                return Ok(true);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }

    async fn pop(&self, wait: Duration) -> Result<Option<Identifier>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.items_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.queue.lock().map_err(poisoned)?.pop_front();
            if let Some(id) = popped {
                self.space_available.notify_waiters();
                return Ok(Some(id));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.queue.lock().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let coordinator = MemoryCoordinator::new(10);
        let ttl = Duration::from_secs(5);

        let token = coordinator.try_lock("id-generation", ttl).await.unwrap();
        assert!(token.is_some());
        assert!(coordinator
            .try_lock("id-generation", ttl)
            .await
            .unwrap()
            .is_none());

        assert!(coordinator.unlock(&token.unwrap()).await.unwrap());
        assert!(coordinator
            .try_lock("id-generation", ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let coordinator = MemoryCoordinator::new(10);
        let stale = coordinator
            .try_lock("id-generation", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fresh = coordinator
            .try_lock("id-generation", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(fresh.is_some());
        assert!(!coordinator.unlock(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let coordinator = MemoryCoordinator::new(10);
        let popped = coordinator.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_when_ids_arrive() {
        let coordinator = Arc::new(MemoryCoordinator::new(10));
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = Identifier::from_parts(3, 7);
        assert!(coordinator
            .push_all(&[id], Duration::from_millis(10))
            .await
            .unwrap());

        assert_eq!(waiter.await.unwrap().unwrap(), Some(id));
    }

    #[tokio::test]
    async fn push_waits_for_room() {
        let coordinator = MemoryCoordinator::new(1);
        let first = Identifier::from_parts(1, 1);
        let second = Identifier::from_parts(1, 2);

        assert!(coordinator
            .push_all(&[first], Duration::ZERO)
            .await
            .unwrap());
        assert!(!coordinator
            .push_all(&[second], Duration::from_millis(20))
            .await
            .unwrap());

        assert_eq!(coordinator.pop(Duration::ZERO).await.unwrap(), Some(first));
        assert!(coordinator
            .push_all(&[second], Duration::ZERO)
            .await
            .unwrap());
        assert_eq!(coordinator.len().await.unwrap(), 1);
    }
}
