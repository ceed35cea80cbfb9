//! Authorization engine: permission checks over principal closures, grants,
//! principal lifecycle and the well-known system principals.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

use super::audit::AuditSink;
use super::error::ServiceError;
use super::id_allocator::IdAllocator;
use super::principal_graph::PrincipalGraph;
use super::reservations::{NameReservationService, SecurableObject};
use super::store::{MembershipStore, PermissionStore, PrincipalDirectory};
use crate::models::{
    never_expires, Ace, AceKey, AceQuery, AclKey, AuditEvent, AuditEventType, Identifier,
    Permission, PermissionSet, Principal, PrincipalType, Reservation, SecurableObjectType,
    SecurablePrincipal,
};

// ==================== Well-known principals ====================

pub const GLOBAL_NAMESPACE_ID: Identifier = Identifier::system(1);
pub const AUTHENTICATED_USER_ROLE_ID: Identifier = Identifier::system(2);
pub const ADMIN_ROLE_ID: Identifier = Identifier::system(3);
pub const ANONYMOUS_USER_ROLE_ID: Identifier = Identifier::system(4);
pub const SYSTEM_SERVICE_ID: Identifier = Identifier::system(5);

pub const AUTHENTICATED_USER_ROLE: &str = "authenticated_user";
pub const ADMIN_ROLE: &str = "admin";
pub const ANONYMOUS_USER_ROLE: &str = "anonymous_user";
pub const SYSTEM_SERVICE: &str = "system";

pub fn system_principal() -> Principal {
    Principal::Service(SYSTEM_SERVICE.to_string())
}

pub fn authenticated_user_role() -> SecurablePrincipal {
    SecurablePrincipal::new(
        AclKey::with_prefix(&[GLOBAL_NAMESPACE_ID], AUTHENTICATED_USER_ROLE_ID),
        Principal::Role(AUTHENTICATED_USER_ROLE.to_string()),
        "Authenticated users",
        "Every signed-in user",
    )
}

pub fn admin_role() -> SecurablePrincipal {
    SecurablePrincipal::new(
        AclKey::with_prefix(&[GLOBAL_NAMESPACE_ID], ADMIN_ROLE_ID),
        Principal::Role(ADMIN_ROLE.to_string()),
        "Administrators",
        "",
    )
}

pub fn anonymous_user_role() -> SecurablePrincipal {
    SecurablePrincipal::new(
        AclKey::with_prefix(&[GLOBAL_NAMESPACE_ID], ANONYMOUS_USER_ROLE_ID),
        Principal::Role(ANONYMOUS_USER_ROLE.to_string()),
        "Anonymous users",
        "",
    )
}

pub fn system_service() -> SecurablePrincipal {
    SecurablePrincipal::new(
        AclKey::single(SYSTEM_SERVICE_ID),
        system_principal(),
        "System",
        "Internal service identity",
    )
}

/// Object type recorded on the owner grant of a new principal.
fn object_type_of(principal_type: PrincipalType) -> SecurableObjectType {
    match principal_type {
        PrincipalType::Organization => SecurableObjectType::Organization,
        PrincipalType::Role => SecurableObjectType::Role,
        PrincipalType::User | PrincipalType::Service => SecurableObjectType::Principal,
    }
}

/// A principal about to be created, before its id is final.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub principal: Principal,
    pub title: String,
    pub description: String,
    /// AclKey of the containing object, e.g. the organization of a role.
    pub parent: Option<AclKey>,
}

struct PrincipalDraft {
    id: Identifier,
    object_type: SecurableObjectType,
}

impl SecurableObject for PrincipalDraft {
    fn id(&self) -> Identifier {
        self.id
    }

    fn set_id(&mut self, id: Identifier) {
        self.id = id;
    }

    fn securable_object_type(&self) -> SecurableObjectType {
        self.object_type
    }
}

pub struct AuthorizationEngine {
    permissions: Arc<dyn PermissionStore>,
    principals: Arc<dyn PrincipalDirectory>,
    graph: PrincipalGraph,
    reservations: Arc<NameReservationService>,
    ids: Arc<IdAllocator>,
    audit: Arc<dyn AuditSink>,
}

impl AuthorizationEngine {
    pub fn new(
        permissions: Arc<dyn PermissionStore>,
        memberships: Arc<dyn MembershipStore>,
        principals: Arc<dyn PrincipalDirectory>,
        reservations: Arc<NameReservationService>,
        ids: Arc<IdAllocator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            permissions,
            graph: PrincipalGraph::new(memberships, principals.clone()),
            principals,
            reservations,
            ids,
            audit,
        }
    }

    pub fn graph(&self) -> &PrincipalGraph {
        &self.graph
    }

    // ==================== Checks ====================

    /// The principal plus everything it inherits from. Unregistered
    /// principals resolve to themselves alone.
    pub async fn closure_of(&self, principal: &Principal) -> Result<BTreeSet<Principal>, ServiceError> {
        let Some(securable) = self.principals.lookup(principal).await? else {
            return Ok(BTreeSet::from([principal.clone()]));
        };
        let mut closures = self.graph.get_closures_bulk(&[securable]).await?;
        Ok(closures
            .remove(principal)
            .unwrap_or_else(|| BTreeSet::from([principal.clone()])))
    }

    /// Effective, unexpired permissions of `principal` on each key.
    /// Every requested key is present in the result, possibly empty.
    #[instrument(skip(self, acl_keys), fields(principal = %principal, keys = acl_keys.len()))]
    pub async fn get_permissions(
        &self,
        principal: &Principal,
        acl_keys: &[AclKey],
    ) -> Result<HashMap<AclKey, PermissionSet>, ServiceError> {
        let mut result: HashMap<AclKey, PermissionSet> = acl_keys
            .iter()
            .map(|k| (k.clone(), PermissionSet::empty()))
            .collect();
        if acl_keys.is_empty() {
            return Ok(result);
        }

        let closure = self.closure_of(principal).await?;
        let keys: Vec<AceKey> = acl_keys
            .iter()
            .flat_map(|acl_key| {
                closure
                    .iter()
                    .map(move |p| AceKey::new(acl_key.clone(), p.clone()))
            })
            .collect();

        let now = Utc::now();
        for (key, value) in self.permissions.get_many(&keys).await? {
            if let Some(held) = result.get_mut(&key.acl_key) {
                *held = held.union(value.active_permissions(now));
            }
        }
        Ok(result)
    }

    /// True when `principal` effectively holds every permission in `required`.
    pub async fn check_permissions(
        &self,
        principal: &Principal,
        acl_key: &AclKey,
        required: PermissionSet,
    ) -> Result<bool, ServiceError> {
        let held = self
            .get_permissions(principal, std::slice::from_ref(acl_key))
            .await?
            .remove(acl_key)
            .unwrap_or_default();
        let granted = held.contains_all(required);
        metrics::counter!(
            "identity_permission_checks_total",
            "result" => if granted { "granted" } else { "denied" }
        )
        .increment(1);
        Ok(granted)
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        acl_key: &AclKey,
        permission: Permission,
    ) -> Result<bool, ServiceError> {
        self.check_permissions(principal, acl_key, PermissionSet::of(&[permission]))
            .await
    }

    // ==================== Grants ====================

    #[instrument(skip(self), fields(acl_key = %acl_key, principal = %principal))]
    pub async fn grant(
        &self,
        acl_key: &AclKey,
        principal: &Principal,
        permissions: PermissionSet,
        object_type: SecurableObjectType,
        expiration_date: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        if permissions.is_empty() {
            return Ok(());
        }
        let key = AceKey::new(acl_key.clone(), principal.clone());
        let expiration_date = expiration_date.unwrap_or_else(never_expires);
        self.permissions
            .merge(std::slice::from_ref(&key), permissions, object_type, expiration_date)
            .await?;

        self.audit
            .record(AuditEvent::new(
                AuditEventType::PermissionsGranted,
                Some(principal.clone()),
                Some(acl_key.clone()),
                Some(json!({ "permissions": permissions.to_names() })),
            ))
            .await;
        Ok(())
    }

    #[instrument(skip(self), fields(acl_key = %acl_key, principal = %principal))]
    pub async fn revoke(
        &self,
        acl_key: &AclKey,
        principal: &Principal,
        permissions: PermissionSet,
    ) -> Result<(), ServiceError> {
        if permissions.is_empty() {
            return Ok(());
        }
        let key = AceKey::new(acl_key.clone(), principal.clone());
        self.permissions
            .subtract(std::slice::from_ref(&key), permissions)
            .await?;

        self.audit
            .record(AuditEvent::new(
                AuditEventType::PermissionsRevoked,
                Some(principal.clone()),
                Some(acl_key.clone()),
                Some(json!({ "permissions": permissions.to_names() })),
            ))
            .await;
        Ok(())
    }

    pub async fn query(&self, query: &AceQuery) -> Result<Vec<Ace>, ServiceError> {
        Ok(self.permissions.query(query).await?)
    }

    pub async fn update_securable_object_type(
        &self,
        key: &AceKey,
        object_type: SecurableObjectType,
    ) -> Result<(), ServiceError> {
        if !self
            .permissions
            .update_securable_object_type(key, object_type)
            .await?
        {
            return Err(ServiceError::NotFound(format!(
                "no permissions for {} on {}",
                key.principal, key.acl_key
            )));
        }
        Ok(())
    }

    // ==================== Principals ====================

    /// Store `template` unless its principal already exists. A new principal
    /// gets an owner grant of every permission on its own AclKey.
    #[instrument(skip(self, template), fields(owner = %owner, principal = %template.principal))]
    pub async fn create_securable_principal_if_not_exists(
        &self,
        owner: &Principal,
        template: &SecurablePrincipal,
    ) -> Result<bool, ServiceError> {
        if !self.principals.create_if_not_exists(template).await? {
            return Ok(false);
        }

        self.permissions
            .merge(
                &[AceKey::new(template.acl_key.clone(), owner.clone())],
                PermissionSet::all(),
                object_type_of(template.principal.principal_type()),
                never_expires(),
            )
            .await?;

        self.audit
            .record(AuditEvent::new(
                AuditEventType::PrincipalCreated,
                Some(template.principal.clone()),
                Some(template.acl_key.clone()),
                Some(json!({ "owner": owner.to_string(), "title": template.title })),
            ))
            .await;
        tracing::info!(principal = %template.principal, acl_key = %template.acl_key, "Principal created");
        Ok(true)
    }

    /// Reserve a name and an id for a new principal, then store it.
    pub async fn create_principal(
        &self,
        owner: &Principal,
        new: NewPrincipal,
    ) -> Result<SecurablePrincipal, ServiceError> {
        if self.principals.lookup(&new.principal).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "principal {} already exists",
                new.principal
            )));
        }

        let prefix: Vec<Identifier> = new
            .parent
            .as_ref()
            .map(|p| p.ids().to_vec())
            .unwrap_or_default();
        let name = new.principal.to_string();
        let mut draft = PrincipalDraft {
            id: self.ids.next_id().await?,
            object_type: object_type_of(new.principal.principal_type()),
        };
        let id = self
            .reservations
            .register_securable_object(&mut draft, &prefix, |_| name.clone())
            .await?;

        let securable = SecurablePrincipal::new(
            AclKey::with_prefix(&prefix, id),
            new.principal,
            new.title,
            new.description,
        );
        match self
            .create_securable_principal_if_not_exists(owner, &securable)
            .await
        {
            Ok(true) => Ok(securable),
            Ok(false) => {
                self.reservations.release(id).await?;
                Err(ServiceError::Conflict(format!(
                    "principal {} already exists",
                    securable.principal
                )))
            }
            Err(e) => {
                self.discard_partial_principal(&securable, id).await;
                Err(e)
            }
        }
    }

    /// Undo whatever a failed creation left behind. The record is removed
    /// only if it is the one this call wrote.
    async fn discard_partial_principal(&self, securable: &SecurablePrincipal, id: Identifier) {
        match self.principals.lookup(&securable.principal).await {
            Ok(Some(record)) if record.acl_key == securable.acl_key => {
                if let Err(e) = self.principals.delete_principal(&securable.principal).await {
                    tracing::warn!(principal = %securable.principal, error = %e, "Failed to remove partially created principal");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(principal = %securable.principal, error = %e, "Failed to look up partially created principal");
            }
        }
        if let Err(e) = self.reservations.release(id).await {
            tracing::warn!(id = %id, error = %e, "Failed to release reservation of failed principal");
        }
    }

    pub async fn lookup(&self, principal: &Principal) -> Result<SecurablePrincipal, ServiceError> {
        self.principals
            .lookup(principal)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("principal {} not found", principal)))
    }

    pub async fn update_title(&self, principal: &Principal, title: &str) -> Result<(), ServiceError> {
        let securable = self.lookup(principal).await?;
        self.permissions
            .update_title(&securable.acl_key, title)
            .await?;
        Ok(())
    }

    /// Make `child` a member of `parent`, so `child` inherits its grants.
    #[instrument(skip(self), fields(child = %child, parent = %parent))]
    pub async fn add_principal_to_principal(
        &self,
        child: &AclKey,
        parent: &AclKey,
    ) -> Result<(), ServiceError> {
        let found = self
            .principals
            .lookup_by_acl_keys(&[child.clone(), parent.clone()])
            .await?;
        for key in [child, parent] {
            if !found.contains_key(key) {
                return Err(ServiceError::NotFound(format!("no principal at {}", key)));
            }
        }

        if self.graph.add_edge(child, parent).await? {
            self.audit
                .record(AuditEvent::new(
                    AuditEventType::MembershipAdded,
                    found.get(child).map(|p| p.principal.clone()),
                    Some(parent.clone()),
                    None,
                ))
                .await;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(child = %child, parent = %parent))]
    pub async fn remove_principal_from_principal(
        &self,
        child: &AclKey,
        parent: &AclKey,
    ) -> Result<(), ServiceError> {
        if !self.graph.remove_edge(child, parent).await? {
            tracing::warn!("Removal of missing membership ignored");
            return Ok(());
        }

        let member = self
            .principals
            .lookup_by_acl_keys(std::slice::from_ref(child))
            .await?
            .remove(child)
            .map(|p| p.principal);
        self.audit
            .record(AuditEvent::new(
                AuditEventType::MembershipRemoved,
                member,
                Some(parent.clone()),
                None,
            ))
            .await;
        Ok(())
    }

    /// Remove a principal with its memberships, grants held and grants on
    /// it, then release its name.
    #[instrument(skip(self), fields(principal = %principal))]
    pub async fn delete_principal(&self, principal: &Principal) -> Result<(), ServiceError> {
        let securable = self.lookup(principal).await?;

        let edges = self.graph.remove_all_edges(&securable.acl_key).await?;
        let held = self.permissions.delete_by_principal(principal).await?;
        let on = self.permissions.delete_by_acl_key(&securable.acl_key).await?;
        self.principals.delete_principal(principal).await?;
        self.reservations.release(securable.id()).await?;

        self.audit
            .record(AuditEvent::new(
                AuditEventType::PrincipalDeleted,
                Some(principal.clone()),
                Some(securable.acl_key.clone()),
                Some(json!({ "edges": edges, "grants_held": held, "grants_on": on })),
            ))
            .await;
        Ok(())
    }

    // ==================== Bootstrap ====================

    /// Create the system principals. Safe to run on every start.
    pub async fn bootstrap(&self) -> Result<(), ServiceError> {
        let system = system_principal();
        let principals = [
            system_service(),
            authenticated_user_role(),
            admin_role(),
            anonymous_user_role(),
        ];

        let mut created = 0usize;
        for securable in &principals {
            self.reservations
                .reserve_well_known(&Reservation::new(
                    securable.acl_key.clone(),
                    object_type_of(securable.principal.principal_type()),
                    securable.principal.to_string(),
                ))
                .await?;
            if self
                .create_securable_principal_if_not_exists(&system, securable)
                .await?
            {
                created += 1;
            }
        }

        self.add_principal_to_principal(&admin_role().acl_key, &authenticated_user_role().acl_key)
            .await?;

        tracing::info!(created = created, "System principals bootstrapped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::RecordingAuditSink;
    use crate::services::memory::MemoryStore;
    use crate::models::AceValue;
    use crate::services::error::StoreError;
    use crate::services::store::ReservationStore;
    use async_trait::async_trait;
    use service_core::retry::RetryConfig;

    /// Permission store whose merges always fail.
    struct BrokenMerge(Arc<MemoryStore>);

    #[async_trait]
    impl PermissionStore for BrokenMerge {
        async fn get(&self, key: &AceKey) -> Result<Option<AceValue>, StoreError> {
            self.0.get(key).await
        }

        async fn get_many(
            &self,
            keys: &[AceKey],
        ) -> Result<HashMap<AceKey, AceValue>, StoreError> {
            self.0.get_many(keys).await
        }

        async fn exists(&self, key: &AceKey) -> Result<bool, StoreError> {
            self.0.exists(key).await
        }

        async fn merge(
            &self,
            _keys: &[AceKey],
            _permissions: PermissionSet,
            _object_type: SecurableObjectType,
            _expiration_date: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Internal("merge unavailable".to_string()))
        }

        async fn subtract(
            &self,
            keys: &[AceKey],
            permissions: PermissionSet,
        ) -> Result<(), StoreError> {
            self.0.subtract(keys, permissions).await
        }

        async fn update_title(&self, acl_key: &AclKey, title: &str) -> Result<bool, StoreError> {
            self.0.update_title(acl_key, title).await
        }

        async fn update_securable_object_type(
            &self,
            key: &AceKey,
            object_type: SecurableObjectType,
        ) -> Result<bool, StoreError> {
            self.0.update_securable_object_type(key, object_type).await
        }

        async fn delete_by_acl_key(&self, acl_key: &AclKey) -> Result<u64, StoreError> {
            self.0.delete_by_acl_key(acl_key).await
        }

        async fn delete_by_principal(&self, principal: &Principal) -> Result<u64, StoreError> {
            self.0.delete_by_principal(principal).await
        }

        async fn query(&self, query: &AceQuery) -> Result<Vec<Ace>, StoreError> {
            self.0.query(query).await
        }
    }

    fn engine(store: Arc<MemoryStore>, audit: Arc<RecordingAuditSink>) -> AuthorizationEngine {
        let ids = Arc::new(IdAllocator::random(64));
        let reservations = Arc::new(NameReservationService::new(
            store.clone(),
            ids.clone(),
            RetryConfig::immediate(5),
        ));
        AuthorizationEngine::new(store.clone(), store.clone(), store, reservations, ids, audit)
    }

    #[tokio::test]
    async fn unregistered_principal_uses_direct_grants() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(RecordingAuditSink::new()));
        let alice = Principal::User("alice".to_string());
        let target = AclKey::single(Identifier::from_parts(2, 7));

        engine
            .grant(&target, &alice, PermissionSet::of(&[Permission::Read]), SecurableObjectType::Study, None)
            .await
            .unwrap();

        assert!(engine.has_permission(&alice, &target, Permission::Read).await.unwrap());
        assert!(!engine.has_permission(&alice, &target, Permission::Write).await.unwrap());
    }

    #[tokio::test]
    async fn expired_grants_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(RecordingAuditSink::new()));
        let bob = Principal::User("bob".to_string());
        let target = AclKey::single(Identifier::from_parts(2, 8));

        engine
            .grant(
                &target,
                &bob,
                PermissionSet::of(&[Permission::Read]),
                SecurableObjectType::Study,
                Some(Utc::now() - chrono::Duration::seconds(1)),
            )
            .await
            .unwrap();

        assert!(!engine.has_permission(&bob, &target, Permission::Read).await.unwrap());
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = engine(store, audit.clone());

        engine.bootstrap().await.unwrap();
        engine.bootstrap().await.unwrap();

        assert_eq!(audit.count(AuditEventType::PrincipalCreated), 4);
        assert_eq!(audit.count(AuditEventType::MembershipAdded), 1);

        let admin = admin_role().principal;
        let closure = engine.closure_of(&admin).await.unwrap();
        assert!(closure.contains(&authenticated_user_role().principal));
        assert_eq!(
            engine.lookup(&system_principal()).await.unwrap().acl_key,
            AclKey::single(SYSTEM_SERVICE_ID)
        );
    }

    #[tokio::test]
    async fn create_principal_grants_owner_and_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(RecordingAuditSink::new()));
        let owner = system_principal();
        let org = engine
            .create_principal(
                &owner,
                NewPrincipal {
                    principal: Principal::Organization("acme".to_string()),
                    title: "Acme".to_string(),
                    description: String::new(),
                    parent: None,
                },
            )
            .await
            .unwrap();
        let role = engine
            .create_principal(
                &owner,
                NewPrincipal {
                    principal: Principal::Role("acme-readers".to_string()),
                    title: "Readers".to_string(),
                    description: String::new(),
                    parent: Some(org.acl_key.clone()),
                },
            )
            .await
            .unwrap();

        assert_eq!(role.acl_key.len(), 2);
        assert_eq!(role.organization_id(), Some(org.id()));
        assert!(engine
            .check_permissions(&owner, &role.acl_key, PermissionSet::all())
            .await
            .unwrap());

        let duplicate = engine
            .create_principal(
                &owner,
                NewPrincipal {
                    principal: Principal::Organization("acme".to_string()),
                    title: "Acme again".to_string(),
                    description: String::new(),
                    parent: None,
                },
            )
            .await;
        assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn failed_creation_releases_the_name() {
        let store = Arc::new(MemoryStore::new());
        let ids = Arc::new(IdAllocator::random(64));
        let reservations = Arc::new(NameReservationService::new(
            store.clone(),
            ids.clone(),
            RetryConfig::immediate(5),
        ));
        let engine = AuthorizationEngine::new(
            Arc::new(BrokenMerge(store.clone())),
            store.clone(),
            store.clone(),
            reservations,
            ids,
            Arc::new(RecordingAuditSink::new()),
        );
        let user = Principal::User("erin".to_string());

        let result = engine
            .create_principal(
                &system_principal(),
                NewPrincipal {
                    principal: user.clone(),
                    title: "Erin".to_string(),
                    description: String::new(),
                    parent: None,
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::Store(StoreError::Internal(_)))
        ));
        assert_eq!(store.count_by_name(&user.to_string()).await.unwrap(), 0);
        assert!(matches!(engine.lookup(&user).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_principal_releases_everything() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(RecordingAuditSink::new()));
        let owner = system_principal();
        let user = Principal::User("carol".to_string());
        let created = engine
            .create_principal(
                &owner,
                NewPrincipal {
                    principal: user.clone(),
                    title: "Carol".to_string(),
                    description: String::new(),
                    parent: None,
                },
            )
            .await
            .unwrap();

        engine.delete_principal(&user).await.unwrap();

        assert!(matches!(engine.lookup(&user).await, Err(ServiceError::NotFound(_))));
        assert!(engine
            .query(&AceQuery::by_acl_key(created.acl_key.clone()))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count_by_name(&user.to_string()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn membership_requires_existing_principals() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(RecordingAuditSink::new()));
        engine.bootstrap().await.unwrap();

        let ghost = AclKey::single(Identifier::from_parts(3, 3));
        let result = engine
            .add_principal_to_principal(&ghost, &admin_role().acl_key)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        engine
            .remove_principal_from_principal(&ghost, &admin_role().acl_key)
            .await
            .unwrap();
    }
}
