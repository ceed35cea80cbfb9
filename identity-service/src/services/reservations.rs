//! Name reservation: binds unique names to securable object ids.
//!
//! Atomicity comes entirely from the store's conditional insert. There is no
//! in-process locking, so concurrent registrations from any number of
//! processes are safe.

use std::collections::HashMap;
use std::sync::Arc;

use service_core::retry::RetryConfig;

use super::error::{ServiceError, StoreError};
use super::id_allocator::IdAllocator;
use super::store::ReservationStore;
use crate::models::{AclKey, Identifier, Reservation, SecurableObjectType};

/// An object that can be registered under a unique name.
pub trait SecurableObject: Send + Sync {
    fn id(&self) -> Identifier;
    fn set_id(&mut self, id: Identifier);
    fn securable_object_type(&self) -> SecurableObjectType;
}

pub struct NameReservationService {
    store: Arc<dyn ReservationStore>,
    ids: Arc<IdAllocator>,
    retry: RetryConfig,
}

impl NameReservationService {
    pub fn new(store: Arc<dyn ReservationStore>, ids: Arc<IdAllocator>, retry: RetryConfig) -> Self {
        Self { store, ids, retry }
    }

    /// Reserve `name_fn(obj)` for `obj` at `prefix + obj.id()`.
    ///
    /// When the name or id is already bound, `obj` receives a fresh id and the
    /// insert is retried, up to the configured attempt budget. Exhausting the
    /// budget is `IllegalState`: the caller has to choose another name.
    pub async fn register_securable_object<T, F>(
        &self,
        obj: &mut T,
        prefix: &[Identifier],
        name_fn: F,
    ) -> Result<Identifier, ServiceError>
    where
        T: SecurableObject,
        F: Fn(&T) -> String + Send + Sync,
    {
        let mut name = name_fn(obj);

        for attempt in 0..self.retry.max_attempts {
            let reservation = Reservation::new(
                AclKey::with_prefix(prefix, obj.id()),
                obj.securable_object_type(),
                name.clone(),
            );

            if let Some(id) = self.store.insert_if_absent(&reservation).await? {
                tracing::info!(
                    name = %name,
                    id = %id,
                    object_type = obj.securable_object_type().as_str(),
                    "Name reserved"
                );
                return Ok(id);
            }

            metrics::counter!("identity_reservation_conflicts_total").increment(1);
            tracing::warn!(
                name = %name,
                attempt = attempt + 1,
                "Reservation conflict, retrying with a fresh id"
            );

            if attempt + 1 < self.retry.max_attempts {
                obj.set_id(self.ids.next_id().await?);
                name = name_fn(obj);

                let backoff = self.retry.backoff_duration(attempt);
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        metrics::counter!("identity_reservation_exhausted_total").increment(1);
        Err(ServiceError::IllegalState(format!(
            "unable to reserve name '{}' after {} attempts",
            name, self.retry.max_attempts
        )))
    }

    /// Bind a fixed name to a fixed id. Succeeds if the binding already
    /// exists; fails if either side is bound to something else.
    pub async fn reserve_well_known(&self, reservation: &Reservation) -> Result<(), ServiceError> {
        if self.store.insert_if_absent(reservation).await?.is_some() {
            return Ok(());
        }

        match self.store.find_by_id(reservation.securable_object_id).await? {
            Some(existing) if existing.securable_object_name == reservation.securable_object_name => {
                Ok(())
            }
            _ => Err(ServiceError::Conflict(format!(
                "well-known name '{}' or id {} is bound elsewhere",
                reservation.securable_object_name, reservation.securable_object_id
            ))),
        }
    }

    pub async fn get_id(&self, name: &str) -> Result<Option<Identifier>, ServiceError> {
        Ok(self
            .get_reservation(name)
            .await?
            .map(|r| r.securable_object_id))
    }

    pub async fn get_ids(&self, names: &[String]) -> Result<HashMap<String, Identifier>, ServiceError> {
        let reservations = self.store.find_by_names(names).await?;
        Ok(reservations
            .into_iter()
            .map(|r| (r.securable_object_name, r.securable_object_id))
            .collect())
    }

    pub async fn get_reservation(&self, name: &str) -> Result<Option<Reservation>, ServiceError> {
        let mut reservations = self.store.find_by_names(&[name.to_string()]).await?;
        Ok(reservations.pop())
    }

    pub async fn get_name(&self, id: Identifier) -> Result<Option<String>, ServiceError> {
        Ok(self
            .store
            .find_by_id(id)
            .await?
            .map(|r| r.securable_object_name))
    }

    pub async fn is_reserved(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.store.count_by_name(name).await? > 0)
    }

    /// Rename a reservation. A missing `old_name` is a logged no-op; a taken
    /// `new_name` is a conflict.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), ServiceError> {
        let updated = self
            .store
            .update_name_by_name(old_name, new_name)
            .await
            .map_err(map_rename_error)?;
        if !updated {
            tracing::warn!(old_name = %old_name, new_name = %new_name, "Rename of missing reservation ignored");
        }
        Ok(())
    }

    pub async fn rename_by_id(&self, id: Identifier, new_name: &str) -> Result<(), ServiceError> {
        let updated = self
            .store
            .update_name_by_id(id, new_name)
            .await
            .map_err(map_rename_error)?;
        if !updated {
            tracing::warn!(id = %id, new_name = %new_name, "Rename of missing reservation ignored");
        }
        Ok(())
    }

    pub async fn release(&self, id: Identifier) -> Result<(), ServiceError> {
        self.release_by_ids(&[id]).await
    }

    pub async fn release_by_ids(&self, ids: &[Identifier]) -> Result<(), ServiceError> {
        let deleted = self.store.delete_by_ids(ids).await?;
        if (deleted as usize) < ids.len() {
            tracing::warn!(
                requested = ids.len(),
                deleted = deleted,
                "Some reservations to release by id were missing"
            );
        }
        Ok(())
    }

    pub async fn release_by_name(&self, name: &str) -> Result<(), ServiceError> {
        self.release_by_names(&[name.to_string()]).await
    }

    pub async fn release_by_names(&self, names: &[String]) -> Result<(), ServiceError> {
        let deleted = self.store.delete_by_names(names).await?;
        if (deleted as usize) < names.len() {
            tracing::warn!(
                requested = names.len(),
                deleted = deleted,
                "Some reservations to release by name were missing"
            );
        }
        Ok(())
    }
}

fn map_rename_error(err: StoreError) -> ServiceError {
    match err {
        StoreError::NameTaken(name) => {
            ServiceError::Conflict(format!("name '{}' is already reserved", name))
        }
        other => ServiceError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;

    struct Study {
        id: Identifier,
        title: String,
    }

    impl SecurableObject for Study {
        fn id(&self) -> Identifier {
            self.id
        }

        fn set_id(&mut self, id: Identifier) {
            self.id = id;
        }

        fn securable_object_type(&self) -> SecurableObjectType {
            SecurableObjectType::Study
        }
    }

    fn service(store: Arc<MemoryStore>) -> NameReservationService {
        NameReservationService::new(
            store,
            Arc::new(IdAllocator::random(16)),
            RetryConfig::immediate(10),
        )
    }

    #[tokio::test]
    async fn taken_name_exhausts_retries() {
        let store = Arc::new(MemoryStore::new());
        let reservations = service(store);

        let mut first = Study {
            id: Identifier::from_parts(1, 1),
            title: "diabetes".to_string(),
        };
        reservations
            .register_securable_object(&mut first, &[], |s| s.title.clone())
            .await
            .unwrap();

        let mut second = Study {
            id: Identifier::from_parts(1, 2),
            title: "diabetes".to_string(),
        };
        let result = reservations
            .register_securable_object(&mut second, &[], |s| s.title.clone())
            .await;
        assert!(matches!(result, Err(ServiceError::IllegalState(_))));
    }

    #[tokio::test]
    async fn taken_id_is_regenerated() {
        let store = Arc::new(MemoryStore::new());
        let reservations = service(store);
        let shared = Identifier::from_parts(1, 1);

        let mut first = Study {
            id: shared,
            title: "a".to_string(),
        };
        reservations
            .register_securable_object(&mut first, &[], |s| s.title.clone())
            .await
            .unwrap();

        let mut second = Study {
            id: shared,
            title: "b".to_string(),
        };
        let id = reservations
            .register_securable_object(&mut second, &[], |s| s.title.clone())
            .await
            .unwrap();
        assert_ne!(id, shared);
        assert_eq!(second.id, id);
        assert_eq!(reservations.get_id("b").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn prefix_is_part_of_the_acl_key() {
        let store = Arc::new(MemoryStore::new());
        let reservations = service(store);
        let org = Identifier::from_parts(4, 1);
        let mut study = Study {
            id: Identifier::from_parts(4, 2),
            title: "s".to_string(),
        };
        reservations
            .register_securable_object(&mut study, &[org], |s| s.title.clone())
            .await
            .unwrap();

        let reservation = reservations.get_reservation("s").await.unwrap().unwrap();
        assert_eq!(reservation.acl_key, AclKey::single(org).child(study.id));
        assert_eq!(reservation.securable_object_type, SecurableObjectType::Study);
    }

    #[tokio::test]
    async fn rename_and_release_of_missing_targets_are_no_ops() {
        let store = Arc::new(MemoryStore::new());
        let reservations = service(store);

        reservations.rename("ghost", "spirit").await.unwrap();
        reservations
            .rename_by_id(Identifier::from_parts(1, 1), "spirit")
            .await
            .unwrap();
        reservations.release_by_name("ghost").await.unwrap();
        reservations
            .release(Identifier::from_parts(1, 1))
            .await
            .unwrap();

        assert!(!reservations.is_reserved("spirit").await.unwrap());
        assert!(!reservations.is_reserved("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn well_known_reservation_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let reservations = service(store);
        let reservation = Reservation::new(
            AclKey::single(Identifier::system(2)),
            SecurableObjectType::Role,
            "authenticated-user",
        );

        reservations.reserve_well_known(&reservation).await.unwrap();
        reservations.reserve_well_known(&reservation).await.unwrap();

        let clash = Reservation::new(
            AclKey::single(Identifier::system(9)),
            SecurableObjectType::Role,
            "authenticated-user",
        );
        assert!(matches!(
            reservations.reserve_well_known(&clash).await,
            Err(ServiceError::Conflict(_))
        ));
    }
}
