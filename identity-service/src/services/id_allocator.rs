//! Cluster-wide identifier allocation.
//!
//! One [`IdReplenisher`] task per process mints ids from the partitioned
//! range store under a cluster lock and feeds them into the shared
//! [`IdQueue`]. [`IdAllocator`] hands them out, draining a small
//! process-local buffer of returned ids first.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ServiceError;
use super::store::{ClusterLock, IdQueue, LockToken, RangeStore};
use crate::config::{IdGenerationConfig, IdGenerationMode};
use crate::models::Identifier;

/// Sentinel key serializing the scroll step across the cluster.
pub const ID_GENERATION_LOCK: &str = "id-generation";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const PUSH_WAIT: Duration = Duration::from_secs(1);

enum IdSource {
    Partitioned(Arc<dyn IdQueue>),
    Random,
}

pub struct IdAllocator {
    source: IdSource,
    local: Mutex<VecDeque<Identifier>>,
    local_capacity: usize,
    acquire_timeout: Duration,
}

impl IdAllocator {
    pub fn new(config: &IdGenerationConfig, queue: Arc<dyn IdQueue>) -> Self {
        let source = match config.mode {
            IdGenerationMode::Partitioned => IdSource::Partitioned(queue),
            IdGenerationMode::Random => IdSource::Random,
        };
        Self {
            source,
            local: Mutex::new(VecDeque::new()),
            local_capacity: config.partitions as usize,
            acquire_timeout: config.acquire_timeout(),
        }
    }

    /// Allocator producing random ids, for environments without a cluster.
    pub fn random(local_capacity: usize) -> Self {
        Self {
            source: IdSource::Random,
            local: Mutex::new(VecDeque::new()),
            local_capacity,
            acquire_timeout: Duration::ZERO,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self.source, IdSource::Random)
    }

    /// Next unused id. Waits up to the acquire timeout for the replenisher
    /// before failing with `IdUnavailable`.
    pub async fn next_id(&self) -> Result<Identifier, ServiceError> {
        if let Some(id) = self.take_local() {
            metrics::counter!("identity_ids_issued_total", "source" => "local").increment(1);
            return Ok(id);
        }

        let queue = match &self.source {
            IdSource::Random => {
                metrics::counter!("identity_ids_issued_total", "source" => "random").increment(1);
                return Ok(random_id());
            }
            IdSource::Partitioned(queue) => queue,
        };

        let started = Instant::now();
        let deadline = started + self.acquire_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match queue.pop(remaining).await? {
                Some(id) if id.is_reserved() => {
                    tracing::warn!(id = %id, "Skipping reserved id found in queue");
                }
                Some(id) => {
                    metrics::histogram!("identity_id_wait_seconds")
                        .record(started.elapsed().as_secs_f64());
                    metrics::counter!("identity_ids_issued_total", "source" => "queue")
                        .increment(1);
                    return Ok(id);
                }
                None => {
                    metrics::counter!("identity_id_acquire_timeouts_total").increment(1);
                    tracing::error!(
                        timeout_ms = self.acquire_timeout.as_millis() as u64,
                        "Timed out waiting for an identifier; is the replenisher running?"
                    );
                    return Err(ServiceError::IdUnavailable(format!(
                        "no identifier available within {} ms",
                        self.acquire_timeout.as_millis()
                    )));
                }
            }
        }
    }

    /// `count` distinct ids. On failure the ids already taken go back to the
    /// local buffer.
    pub async fn next_ids(&self, count: usize) -> Result<HashSet<Identifier>, ServiceError> {
        let mut ids = HashSet::with_capacity(count);
        while ids.len() < count {
            match self.next_id().await {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => {
                    self.return_ids(ids);
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Offer an unused id back to this process. It is never returned to the
    /// cluster; if the buffer is full or the process dies, the id is wasted.
    pub fn return_id(&self, id: Identifier) {
        self.return_ids(std::iter::once(id));
    }

    pub fn return_ids(&self, ids: impl IntoIterator<Item = Identifier>) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if id.is_reserved() || local.contains(&id) {
                continue;
            }
            if local.len() >= self.local_capacity {
                tracing::debug!(id = %id, "Local id buffer full, dropping returned id");
                continue;
            }
            local.push_back(id);
        }
    }

    /// Number of returned ids waiting in the local buffer.
    pub fn buffered(&self) -> usize {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_local(&self) -> Option<Identifier> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

fn random_id() -> Identifier {
    loop {
        let id = Identifier::random();
        if !id.is_reserved() {
            return id;
        }
    }
}

/// Background task minting ids into the shared queue.
pub struct IdReplenisher {
    ranges: Arc<dyn RangeStore>,
    lock: Arc<dyn ClusterLock>,
    queue: Arc<dyn IdQueue>,
    config: IdGenerationConfig,
    retired: HashSet<u16>,
}

impl IdReplenisher {
    pub fn new(
        ranges: Arc<dyn RangeStore>,
        lock: Arc<dyn ClusterLock>,
        queue: Arc<dyn IdQueue>,
        config: IdGenerationConfig,
    ) -> Self {
        Self {
            ranges,
            lock,
            queue,
            config,
            retired: HashSet::new(),
        }
    }

    /// Start the task. It runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            partitions = self.config.partitions,
            scroll_size = self.config.scroll_size,
            "Starting id replenisher"
        );

        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            max_interval: Duration::from_secs(30),
            ..Default::default()
        };

        loop {
            let initialized = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = self.ranges.initialize_partitions(self.config.partitions) => result,
            };
            match initialized {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    tracing::error!(error = %e, delay_ms = delay.as_millis() as u64, "Failed to initialize id partitions");
                    if !sleep_or_cancel(delay, &shutdown).await {
                        return;
                    }
                }
            }
        }
        backoff.reset();

        while !shutdown.is_cancelled() {
            match self.replenish_once(&shutdown).await {
                Ok(_) if self.active_partitions().is_empty() => {
                    tracing::error!("No active id partitions left, stopping replenisher");
                    break;
                }
                Ok(_) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    metrics::counter!("identity_replenish_errors_total").increment(1);
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Id replenishment round failed"
                    );
                    if !sleep_or_cancel(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Id replenisher shutting down");
    }

    /// Partitions that have not been retired.
    pub fn active_partitions(&self) -> Vec<u16> {
        (0..self.config.partitions.min(u16::MAX as u32 + 1))
            .map(|p| p as u16)
            .filter(|p| !self.retired.contains(p))
            .collect()
    }

    /// One round: lock, scroll every active partition, unlock, deliver.
    /// Returns the number of ids delivered to the queue.
    pub async fn replenish_once(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<usize, ServiceError> {
        let partitions = self.active_partitions();
        if partitions.is_empty() {
            return Ok(0);
        }

        let Some(token) = self.acquire_lock(shutdown).await? else {
            return Ok(0);
        };

        let scrolled = self
            .ranges
            .scroll(&partitions, self.config.scroll_size)
            .await;

        match self.lock.unlock(&token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Id generation lock expired before release"),
            Err(e) => tracing::warn!(error = %e, "Failed to release id generation lock"),
        }

        let scrolled = scrolled?;

        for partition in &scrolled.exhausted {
            tracing::error!(partition = partition, "Id partition exhausted, retiring it");
            metrics::counter!("identity_partitions_retired_total").increment(1);
            self.retired.insert(*partition);
        }
        if !scrolled.exhausted.is_empty() && self.retired.len() as u32 >= self.config.partitions {
            tracing::error!("Every id partition is exhausted; no further ids can be minted");
        }

        let mut ids = scrolled.ids;
        ids.retain(|id| !id.is_reserved());
        if ids.is_empty() {
            return Ok(0);
        }
        metrics::counter!("identity_ids_minted_total").increment(ids.len() as u64);

        loop {
            if self.queue.push_all(&ids, PUSH_WAIT).await? {
                tracing::debug!(count = ids.len(), "Delivered minted ids");
                return Ok(ids.len());
            }
            if shutdown.is_cancelled() {
                tracing::warn!(count = ids.len(), "Dropping undelivered ids on shutdown");
                return Ok(0);
            }
        }
    }

    /// Poll for the cluster lock for up to the configured wait. `None` means
    /// another node holds it or shutdown was requested.
    async fn acquire_lock(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<LockToken>, ServiceError> {
        let deadline = Instant::now() + self.config.lock_wait();
        loop {
            if let Some(token) = self
                .lock
                .try_lock(ID_GENERATION_LOCK, self.config.lock_ttl())
                .await?
            {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                tracing::debug!("Id generation lock busy");
                return Ok(None);
            }
            if !sleep_or_cancel(LOCK_POLL_INTERVAL, shutdown).await {
                return Ok(None);
            }
        }
    }
}

/// Sleep for `delay`; false if cancelled first.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
