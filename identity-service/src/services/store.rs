//! Storage and coordination seams.
//!
//! Each trait is implemented by the PostgreSQL/Redis backends and by the
//! in-process backends. Every mutation is atomic where the record lives; no
//! trait exposes a read-modify-write cycle to its callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::error::StoreError;
use crate::models::{
    Ace, AceKey, AceQuery, AceValue, AclKey, Identifier, PermissionSet, Principal, Range,
    Reservation, ScrollResult, SecurableObjectType, SecurablePrincipal,
};

/// Persisted per-partition allocation cursors.
#[async_trait]
pub trait RangeStore: Send + Sync {
    /// Create the cursor row of every partition below `partitions` that has none.
    async fn initialize_partitions(&self, partitions: u32) -> Result<(), StoreError>;

    async fn get_range(&self, partition: u16) -> Result<Option<Range>, StoreError>;

    /// Insert or overwrite one cursor.
    async fn save_range(&self, range: &Range) -> Result<(), StoreError>;

    /// Advance every listed partition by `count` in one atomic step and return
    /// the minted ids. Partitions that cannot supply `count` ids are reported
    /// as exhausted and left untouched.
    async fn scroll(&self, partitions: &[u16], count: u64) -> Result<ScrollResult, StoreError>;
}

/// Name <-> id bindings of securable objects.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert unless the name or the id is already bound. Returns the persisted
    /// id when a row was created.
    async fn insert_if_absent(
        &self,
        reservation: &Reservation,
    ) -> Result<Option<Identifier>, StoreError>;

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_id(&self, id: Identifier) -> Result<Option<Reservation>, StoreError>;

    async fn count_by_name(&self, name: &str) -> Result<u64, StoreError>;

    /// Returns false when no row carries `old_name`. Fails with
    /// `StoreError::NameTaken` when `new_name` belongs to another row.
    async fn update_name_by_name(&self, old_name: &str, new_name: &str)
        -> Result<bool, StoreError>;

    async fn update_name_by_id(&self, id: Identifier, new_name: &str) -> Result<bool, StoreError>;

    async fn delete_by_names(&self, names: &[String]) -> Result<u64, StoreError>;

    async fn delete_by_ids(&self, ids: &[Identifier]) -> Result<u64, StoreError>;
}

/// (object, principal) -> permission set and metadata.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get(&self, key: &AceKey) -> Result<Option<AceValue>, StoreError>;

    async fn get_many(&self, keys: &[AceKey]) -> Result<HashMap<AceKey, AceValue>, StoreError>;

    /// Presence check that does not materialize the value.
    async fn exists(&self, key: &AceKey) -> Result<bool, StoreError>;

    /// Union `permissions` into every key. Absent keys are created with the
    /// given object type and expiration. Existing keys keep their object type
    /// and take the later of the two expirations.
    async fn merge(
        &self,
        keys: &[AceKey],
        permissions: PermissionSet,
        object_type: SecurableObjectType,
        expiration_date: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove `permissions` from every key, deleting entries left empty.
    async fn subtract(&self, keys: &[AceKey], permissions: PermissionSet)
        -> Result<(), StoreError>;

    /// Set the title of the securable principal addressed by `acl_key`.
    async fn update_title(&self, acl_key: &AclKey, title: &str) -> Result<bool, StoreError>;

    async fn update_securable_object_type(
        &self,
        key: &AceKey,
        object_type: SecurableObjectType,
    ) -> Result<bool, StoreError>;

    async fn delete_by_acl_key(&self, acl_key: &AclKey) -> Result<u64, StoreError>;

    async fn delete_by_principal(&self, principal: &Principal) -> Result<u64, StoreError>;

    async fn query(&self, query: &AceQuery) -> Result<Vec<Ace>, StoreError>;
}

/// Membership edges, stored child -> parent.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn add_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError>;

    async fn remove_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError>;

    /// Drop every edge touching `key`, as child or as parent.
    async fn remove_all_edges(&self, key: &AclKey) -> Result<u64, StoreError>;

    /// Direct parents of each key. Keys without parents are absent from the map.
    async fn get_parents(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, HashSet<AclKey>>, StoreError>;
}

/// Persisted securable principals.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Returns false when the principal or its AclKey already exists.
    async fn create_if_not_exists(&self, principal: &SecurablePrincipal)
        -> Result<bool, StoreError>;

    async fn lookup(&self, principal: &Principal) -> Result<Option<SecurablePrincipal>, StoreError>;

    async fn lookup_by_acl_keys(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, SecurablePrincipal>, StoreError>;

    async fn delete_principal(
        &self,
        principal: &Principal,
    ) -> Result<Option<SecurablePrincipal>, StoreError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;
}

// ==================== Cluster coordination ====================

/// Proof of a held cluster lock, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub name: String,
    pub token: String,
}

/// Cluster-wide mutual exclusion on named keys. Locks expire after their TTL
/// so a crashed holder cannot wedge the cluster.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError>;

    /// Returns false when the lock had already expired or changed hands.
    async fn unlock(&self, token: &LockToken) -> Result<bool, StoreError>;
}

/// Cluster-shared prefetch queue of minted identifiers.
#[async_trait]
pub trait IdQueue: Send + Sync {
    /// Append `ids`, waiting up to `wait` while the queue is at capacity.
    /// Returns false when no room became available in time.
    async fn push_all(&self, ids: &[Identifier], wait: Duration) -> Result<bool, StoreError>;

    /// Take the oldest id, waiting up to `wait` for one to arrive.
    async fn pop(&self, wait: Duration) -> Result<Option<Identifier>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}
