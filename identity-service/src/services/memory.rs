//! In-process backend for every store trait.
//!
//! Used for single-node deployments and tests. Each table sits behind its own
//! lock and every trait method runs as one critical section, which gives the
//! same atomicity the PostgreSQL backend gets from single statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use super::error::StoreError;
use super::store::{
    HealthCheck, MembershipStore, PermissionStore, PrincipalDirectory, RangeStore,
    ReservationStore,
};
use crate::models::{
    Ace, AceKey, AceQuery, AceValue, AclKey, Identifier, PermissionSet, Principal, Range,
    Reservation, ScrollResult, SecurableObjectType, SecurablePrincipal,
};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Internal("memory store lock poisoned".to_string())
}

#[derive(Default)]
struct ReservationTable {
    by_name: HashMap<String, Identifier>,
    by_id: HashMap<Identifier, Reservation>,
}

impl ReservationTable {
    fn rename(&mut self, id: Identifier, new_name: &str) -> Result<bool, StoreError> {
        let Some(current) = self.by_id.get(&id) else {
            return Ok(false);
        };
        if current.securable_object_name == new_name {
            return Ok(true);
        }
        if self.by_name.contains_key(new_name) {
            return Err(StoreError::NameTaken(new_name.to_string()));
        }

        let old_name = current.securable_object_name.clone();
        self.by_name.remove(&old_name);
        self.by_name.insert(new_name.to_string(), id);
        if let Some(reservation) = self.by_id.get_mut(&id) {
            reservation.securable_object_name = new_name.to_string();
        }
        Ok(true)
    }

    fn remove_id(&mut self, id: &Identifier) -> bool {
        match self.by_id.remove(id) {
            Some(reservation) => {
                self.by_name.remove(&reservation.securable_object_name);
                true
            }
            None => false,
        }
    }
}

/// Entries plus secondary indexes for the AclKey, principal and root axes.
#[derive(Default)]
struct PermissionTable {
    entries: HashMap<AceKey, AceValue>,
    by_acl_key: HashMap<AclKey, HashSet<Principal>>,
    by_principal: HashMap<Principal, HashSet<AclKey>>,
    by_root: HashMap<Identifier, HashSet<AceKey>>,
}

impl PermissionTable {
    fn insert(&mut self, key: AceKey, value: AceValue) {
        self.by_acl_key
            .entry(key.acl_key.clone())
            .or_default()
            .insert(key.principal.clone());
        self.by_principal
            .entry(key.principal.clone())
            .or_default()
            .insert(key.acl_key.clone());
        self.by_root
            .entry(key.acl_key.root())
            .or_default()
            .insert(key.clone());
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &AceKey) -> Option<AceValue> {
        let value = self.entries.remove(key)?;
        if let Some(principals) = self.by_acl_key.get_mut(&key.acl_key) {
            principals.remove(&key.principal);
            if principals.is_empty() {
                self.by_acl_key.remove(&key.acl_key);
            }
        }
        if let Some(acl_keys) = self.by_principal.get_mut(&key.principal) {
            acl_keys.remove(&key.acl_key);
            if acl_keys.is_empty() {
                self.by_principal.remove(&key.principal);
            }
        }
        let root = key.acl_key.root();
        if let Some(keys) = self.by_root.get_mut(&root) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_root.remove(&root);
            }
        }
        Some(value)
    }

    /// Narrow the scan with the most selective index the query allows.
    fn candidates(&self, query: &AceQuery) -> Vec<AceKey> {
        if let Some(key) = &query.ace_key {
            return self
                .entries
                .contains_key(key)
                .then(|| key.clone())
                .into_iter()
                .collect();
        }
        if let Some(acl_key) = &query.acl_key {
            return self
                .by_acl_key
                .get(acl_key)
                .map(|principals| {
                    principals
                        .iter()
                        .map(|p| AceKey::new(acl_key.clone(), p.clone()))
                        .collect()
                })
                .unwrap_or_default();
        }
        if let Some(principal) = &query.principal {
            return self
                .by_principal
                .get(principal)
                .map(|acl_keys| {
                    acl_keys
                        .iter()
                        .map(|k| AceKey::new(k.clone(), principal.clone()))
                        .collect()
                })
                .unwrap_or_default();
        }
        if let Some(root) = &query.root {
            return self
                .by_root
                .get(root)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default();
        }
        self.entries.keys().cloned().collect()
    }
}

#[derive(Default)]
struct PrincipalTable {
    by_principal: HashMap<Principal, SecurablePrincipal>,
    by_acl_key: HashMap<AclKey, Principal>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    ranges: Mutex<BTreeMap<u16, Range>>,
    reservations: Mutex<ReservationTable>,
    permissions: RwLock<PermissionTable>,
    memberships: DashMap<AclKey, HashSet<AclKey>>,
    principals: RwLock<PrincipalTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ==================== Ranges ====================

#[async_trait]
impl RangeStore for MemoryStore {
    async fn initialize_partitions(&self, partitions: u32) -> Result<(), StoreError> {
        let mut ranges = self.ranges.lock().map_err(poisoned)?;
        for partition in 0..partitions.min(u16::MAX as u32 + 1) {
            let partition = partition as u16;
            ranges
                .entry(partition)
                .or_insert_with(|| Range::initial(partition));
        }
        Ok(())
    }

    async fn get_range(&self, partition: u16) -> Result<Option<Range>, StoreError> {
        let ranges = self.ranges.lock().map_err(poisoned)?;
        Ok(ranges.get(&partition).copied())
    }

    async fn save_range(&self, range: &Range) -> Result<(), StoreError> {
        let mut ranges = self.ranges.lock().map_err(poisoned)?;
        ranges.insert(range.partition(), *range);
        Ok(())
    }

    async fn scroll(&self, partitions: &[u16], count: u64) -> Result<ScrollResult, StoreError> {
        let mut ranges = self.ranges.lock().map_err(poisoned)?;
        let mut result = ScrollResult::default();

        for &partition in partitions {
            let range = ranges
                .entry(partition)
                .or_insert_with(|| Range::initial(partition));
            match range.advance(count) {
                Some(ids) => result.ids.extend(ids),
                None => result.exhausted.push(partition),
            }
        }

        Ok(result)
    }
}

// ==================== Reservations ====================

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_if_absent(
        &self,
        reservation: &Reservation,
    ) -> Result<Option<Identifier>, StoreError> {
        let mut table = self.reservations.lock().map_err(poisoned)?;
        let id = reservation.securable_object_id;

        if table
            .by_name
            .contains_key(&reservation.securable_object_name)
            || table.by_id.contains_key(&id)
        {
            return Ok(None);
        }

        table
            .by_name
            .insert(reservation.securable_object_name.clone(), id);
        table.by_id.insert(id, reservation.clone());
        Ok(Some(id))
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Reservation>, StoreError> {
        let table = self.reservations.lock().map_err(poisoned)?;
        Ok(names
            .iter()
            .filter_map(|name| table.by_name.get(name))
            .filter_map(|id| table.by_id.get(id))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Identifier) -> Result<Option<Reservation>, StoreError> {
        let table = self.reservations.lock().map_err(poisoned)?;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn count_by_name(&self, name: &str) -> Result<u64, StoreError> {
        let table = self.reservations.lock().map_err(poisoned)?;
        Ok(table.by_name.contains_key(name) as u64)
    }

    async fn update_name_by_name(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, StoreError> {
        let mut table = self.reservations.lock().map_err(poisoned)?;
        match table.by_name.get(old_name).copied() {
            Some(id) => table.rename(id, new_name),
            None => Ok(false),
        }
    }

    async fn update_name_by_id(&self, id: Identifier, new_name: &str) -> Result<bool, StoreError> {
        let mut table = self.reservations.lock().map_err(poisoned)?;
        table.rename(id, new_name)
    }

    async fn delete_by_names(&self, names: &[String]) -> Result<u64, StoreError> {
        let mut table = self.reservations.lock().map_err(poisoned)?;
        let mut deleted = 0;
        for name in names {
            if let Some(id) = table.by_name.get(name).copied() {
                if table.remove_id(&id) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_by_ids(&self, ids: &[Identifier]) -> Result<u64, StoreError> {
        let mut table = self.reservations.lock().map_err(poisoned)?;
        Ok(ids.iter().filter(|id| table.remove_id(id)).count() as u64)
    }
}

// ==================== Permissions ====================

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get(&self, key: &AceKey) -> Result<Option<AceValue>, StoreError> {
        let table = self.permissions.read().map_err(poisoned)?;
        Ok(table.entries.get(key).cloned())
    }

    async fn get_many(&self, keys: &[AceKey]) -> Result<HashMap<AceKey, AceValue>, StoreError> {
        let table = self.permissions.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| table.entries.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn exists(&self, key: &AceKey) -> Result<bool, StoreError> {
        let table = self.permissions.read().map_err(poisoned)?;
        Ok(table.entries.contains_key(key))
    }

    async fn merge(
        &self,
        keys: &[AceKey],
        permissions: PermissionSet,
        object_type: SecurableObjectType,
        expiration_date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut table = self.permissions.write().map_err(poisoned)?;
        for key in keys {
            match table.entries.get_mut(key) {
                Some(value) => {
                    value.permissions = value.permissions.union(permissions);
                    value.expiration_date = value.expiration_date.max(expiration_date);
                }
                None => table.insert(
                    key.clone(),
                    AceValue::new(permissions, object_type, expiration_date),
                ),
            }
        }
        Ok(())
    }

    async fn subtract(
        &self,
        keys: &[AceKey],
        permissions: PermissionSet,
    ) -> Result<(), StoreError> {
        let mut table = self.permissions.write().map_err(poisoned)?;
        for key in keys {
            let emptied = match table.entries.get_mut(key) {
                Some(value) => {
                    value.permissions = value.permissions.difference(permissions);
                    value.permissions.is_empty()
                }
                None => false,
            };
            if emptied {
                table.remove(key);
            }
        }
        Ok(())
    }

    async fn update_title(&self, acl_key: &AclKey, title: &str) -> Result<bool, StoreError> {
        let mut table = self.principals.write().map_err(poisoned)?;
        let Some(principal) = table.by_acl_key.get(acl_key).cloned() else {
            return Ok(false);
        };
        match table.by_principal.get_mut(&principal) {
            Some(record) => {
                record.title = title.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_securable_object_type(
        &self,
        key: &AceKey,
        object_type: SecurableObjectType,
    ) -> Result<bool, StoreError> {
        let mut table = self.permissions.write().map_err(poisoned)?;
        match table.entries.get_mut(key) {
            Some(value) => {
                value.securable_object_type = object_type;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_acl_key(&self, acl_key: &AclKey) -> Result<u64, StoreError> {
        let mut table = self.permissions.write().map_err(poisoned)?;
        let keys = table.candidates(&AceQuery::by_acl_key(acl_key.clone()));
        Ok(keys.iter().filter_map(|k| table.remove(k)).count() as u64)
    }

    async fn delete_by_principal(&self, principal: &Principal) -> Result<u64, StoreError> {
        let mut table = self.permissions.write().map_err(poisoned)?;
        let keys = table.candidates(&AceQuery::by_principal(principal.clone()));
        Ok(keys.iter().filter_map(|k| table.remove(k)).count() as u64)
    }

    async fn query(&self, query: &AceQuery) -> Result<Vec<Ace>, StoreError> {
        let table = self.permissions.read().map_err(poisoned)?;
        let mut aces: Vec<Ace> = table
            .candidates(query)
            .into_iter()
            .filter_map(|key| {
                let value = table.entries.get(&key)?;
                query.matches(&key, value).then(|| Ace {
                    value: value.clone(),
                    key,
                })
            })
            .collect();
        aces.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(aces)
    }
}

// ==================== Memberships ====================

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn add_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError> {
        Ok(self
            .memberships
            .entry(child.clone())
            .or_default()
            .insert(parent.clone()))
    }

    async fn remove_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError> {
        let removed = match self.memberships.get_mut(child) {
            Some(mut parents) => parents.remove(parent),
            None => false,
        };
        self.memberships
            .remove_if(child, |_, parents| parents.is_empty());
        Ok(removed)
    }

    async fn remove_all_edges(&self, key: &AclKey) -> Result<u64, StoreError> {
        let mut removed = self
            .memberships
            .remove(key)
            .map(|(_, parents)| parents.len() as u64)
            .unwrap_or(0);

        for mut entry in self.memberships.iter_mut() {
            if entry.value_mut().remove(key) {
                removed += 1;
            }
        }
        self.memberships.retain(|_, parents| !parents.is_empty());
        Ok(removed)
    }

    async fn get_parents(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, HashSet<AclKey>>, StoreError> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.memberships
                    .get(key)
                    .filter(|parents| !parents.is_empty())
                    .map(|parents| (key.clone(), parents.clone()))
            })
            .collect())
    }
}

// ==================== Principals ====================

#[async_trait]
impl PrincipalDirectory for MemoryStore {
    async fn create_if_not_exists(
        &self,
        principal: &SecurablePrincipal,
    ) -> Result<bool, StoreError> {
        let mut table = self.principals.write().map_err(poisoned)?;
        if table.by_principal.contains_key(&principal.principal)
            || table.by_acl_key.contains_key(&principal.acl_key)
        {
            return Ok(false);
        }
        table
            .by_acl_key
            .insert(principal.acl_key.clone(), principal.principal.clone());
        table
            .by_principal
            .insert(principal.principal.clone(), principal.clone());
        Ok(true)
    }

    async fn lookup(&self, principal: &Principal) -> Result<Option<SecurablePrincipal>, StoreError> {
        let table = self.principals.read().map_err(poisoned)?;
        Ok(table.by_principal.get(principal).cloned())
    }

    async fn lookup_by_acl_keys(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, SecurablePrincipal>, StoreError> {
        let table = self.principals.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let principal = table.by_acl_key.get(key)?;
                let record = table.by_principal.get(principal)?;
                Some((key.clone(), record.clone()))
            })
            .collect())
    }

    async fn delete_principal(
        &self,
        principal: &Principal,
    ) -> Result<Option<SecurablePrincipal>, StoreError> {
        let mut table = self.principals.write().map_err(poisoned)?;
        let removed = table.by_principal.remove(principal);
        if let Some(record) = &removed {
            table.by_acl_key.remove(&record.acl_key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{never_expires, Permission};

    fn key(counter: u128, principal: &str) -> AceKey {
        AceKey::new(
            AclKey::single(Identifier::from_parts(1, counter)),
            Principal::Role(principal.to_string()),
        )
    }

    #[tokio::test]
    async fn scroll_reports_exhausted_partitions() {
        let store = MemoryStore::new();
        store.initialize_partitions(2).await.unwrap();

        let mut nearly_full = Range::initial(1);
        nearly_full.msb = Identifier::from_parts(1, (1u128 << 112) - 3).to_halves().0;
        nearly_full.lsb = Identifier::from_parts(1, (1u128 << 112) - 3).to_halves().1;
        store.save_range(&nearly_full).await.unwrap();

        let result = store.scroll(&[0, 1], 5).await.unwrap();
        assert_eq!(result.ids.len(), 5);
        assert_eq!(result.exhausted, vec![1]);
        assert_eq!(store.get_range(1).await.unwrap(), Some(nearly_full));
    }

    #[tokio::test]
    async fn insert_if_absent_rejects_taken_name_or_id() {
        let store = MemoryStore::new();
        let a = Identifier::from_parts(1, 1);
        let b = Identifier::from_parts(1, 2);

        let first = Reservation::new(AclKey::single(a), SecurableObjectType::Study, "s1");
        assert_eq!(store.insert_if_absent(&first).await.unwrap(), Some(a));

        let same_name = Reservation::new(AclKey::single(b), SecurableObjectType::Study, "s1");
        assert_eq!(store.insert_if_absent(&same_name).await.unwrap(), None);

        let same_id = Reservation::new(AclKey::single(a), SecurableObjectType::Study, "s2");
        assert_eq!(store.insert_if_absent(&same_id).await.unwrap(), None);
        assert_eq!(store.count_by_name("s2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rename_onto_taken_name_fails() {
        let store = MemoryStore::new();
        for (counter, name) in [(1, "a"), (2, "b")] {
            let reservation = Reservation::new(
                AclKey::single(Identifier::from_parts(1, counter)),
                SecurableObjectType::Study,
                name,
            );
            store.insert_if_absent(&reservation).await.unwrap();
        }

        let result = store.update_name_by_name("a", "b").await;
        assert!(matches!(result, Err(StoreError::NameTaken(_))));
        assert!(store.update_name_by_name("a", "c").await.unwrap());
        assert!(!store.update_name_by_name("a", "d").await.unwrap());
        assert_eq!(store.count_by_name("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn subtract_deletes_emptied_entries_and_indexes() {
        let store = MemoryStore::new();
        let k = key(1, "r1");
        store
            .merge(
                &[k.clone()],
                PermissionSet::of(&[Permission::Read, Permission::Write]),
                SecurableObjectType::Study,
                never_expires(),
            )
            .await
            .unwrap();

        store
            .subtract(&[k.clone()], PermissionSet::of(&[Permission::Read]))
            .await
            .unwrap();
        assert_eq!(
            store.get(&k).await.unwrap().unwrap().permissions,
            PermissionSet::of(&[Permission::Write])
        );

        store
            .subtract(&[k.clone()], PermissionSet::of(&[Permission::Write]))
            .await
            .unwrap();
        assert!(!store.exists(&k).await.unwrap());
        let by_root = store
            .query(&AceQuery::by_root(k.acl_key.root()))
            .await
            .unwrap();
        assert!(by_root.is_empty());
    }

    #[tokio::test]
    async fn remove_all_edges_clears_both_directions() {
        let store = MemoryStore::new();
        let a = AclKey::single(Identifier::from_parts(1, 1));
        let b = AclKey::single(Identifier::from_parts(1, 2));
        let c = AclKey::single(Identifier::from_parts(1, 3));
        store.add_edge(&a, &b).await.unwrap();
        store.add_edge(&b, &c).await.unwrap();
        assert!(!store.add_edge(&a, &b).await.unwrap());

        assert_eq!(store.remove_all_edges(&b).await.unwrap(), 2);
        let parents = store.get_parents(&[a, b]).await.unwrap();
        assert!(parents.is_empty());
    }
}
