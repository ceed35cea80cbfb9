//! Access control entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AclKey, Identifier, PermissionSet, Principal, PrincipalType};

/// Kinds of securable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurableObjectType {
    Organization,
    Role,
    Principal,
    Study,
    Participant,
    Questionnaire,
    AppData,
    /// Stored type was missing or unrecognized.
    Unknown,
}

impl SecurableObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurableObjectType::Organization => "organization",
            SecurableObjectType::Role => "role",
            SecurableObjectType::Principal => "principal",
            SecurableObjectType::Study => "study",
            SecurableObjectType::Participant => "participant",
            SecurableObjectType::Questionnaire => "questionnaire",
            SecurableObjectType::AppData => "app_data",
            SecurableObjectType::Unknown => "unknown",
        }
    }

    /// Read a stored type, degrading to `Unknown` with a warning.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(str::parse::<SecurableObjectType>) {
            Some(Ok(t)) => t,
            Some(Err(_)) | None => {
                tracing::warn!(
                    stored = value.unwrap_or("<null>"),
                    "Securable object type missing or unknown, returning degraded value"
                );
                SecurableObjectType::Unknown
            }
        }
    }
}

impl std::str::FromStr for SecurableObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" => Ok(SecurableObjectType::Organization),
            "role" => Ok(SecurableObjectType::Role),
            "principal" => Ok(SecurableObjectType::Principal),
            "study" => Ok(SecurableObjectType::Study),
            "participant" => Ok(SecurableObjectType::Participant),
            "questionnaire" => Ok(SecurableObjectType::Questionnaire),
            "app_data" => Ok(SecurableObjectType::AppData),
            "unknown" => Ok(SecurableObjectType::Unknown),
            _ => Err(format!("Invalid securable object type: {}", s)),
        }
    }
}

/// Expiration used for grants that never expire.
pub fn never_expires() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Identifies one access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AceKey {
    pub acl_key: AclKey,
    pub principal: Principal,
}

impl AceKey {
    pub fn new(acl_key: AclKey, principal: Principal) -> Self {
        Self { acl_key, principal }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceValue {
    pub permissions: PermissionSet,
    pub securable_object_type: SecurableObjectType,
    pub expiration_date: DateTime<Utc>,
}

impl AceValue {
    pub fn new(
        permissions: PermissionSet,
        securable_object_type: SecurableObjectType,
        expiration_date: DateTime<Utc>,
    ) -> Self {
        Self {
            permissions,
            securable_object_type,
            expiration_date,
        }
    }

    /// A grant is visible strictly before its expiration date.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date > now
    }

    pub fn active_permissions(&self, now: DateTime<Utc>) -> PermissionSet {
        if self.is_active_at(now) {
            self.permissions
        } else {
            PermissionSet::empty()
        }
    }
}

/// An entry as returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ace {
    #[serde(flatten)]
    pub key: AceKey,
    #[serde(flatten)]
    pub value: AceValue,
}

/// Multi-axis filter over stored entries. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AceQuery {
    pub ace_key: Option<AceKey>,
    pub acl_key: Option<AclKey>,
    pub principal: Option<Principal>,
    pub principal_type: Option<PrincipalType>,
    pub securable_object_type: Option<SecurableObjectType>,
    pub root: Option<Identifier>,
    /// Matches entries holding at least one of these permissions.
    pub any_permission: Option<PermissionSet>,
    pub expires_after: Option<DateTime<Utc>>,
    pub expires_before: Option<DateTime<Utc>>,
}

impl AceQuery {
    pub fn by_acl_key(acl_key: AclKey) -> Self {
        Self {
            acl_key: Some(acl_key),
            ..Default::default()
        }
    }

    pub fn by_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            ..Default::default()
        }
    }

    pub fn by_root(root: Identifier) -> Self {
        Self {
            root: Some(root),
            ..Default::default()
        }
    }

    pub fn matches(&self, key: &AceKey, value: &AceValue) -> bool {
        if let Some(ace_key) = &self.ace_key {
            if ace_key != key {
                return false;
            }
        }
        if let Some(acl_key) = &self.acl_key {
            if acl_key != &key.acl_key {
                return false;
            }
        }
        if let Some(principal) = &self.principal {
            if principal != &key.principal {
                return false;
            }
        }
        if let Some(principal_type) = self.principal_type {
            if principal_type != key.principal.principal_type() {
                return false;
            }
        }
        if let Some(object_type) = self.securable_object_type {
            if object_type != value.securable_object_type {
                return false;
            }
        }
        if let Some(root) = self.root {
            if root != key.acl_key.root() {
                return false;
            }
        }
        if let Some(any) = self.any_permission {
            if !value.permissions.intersects(any) {
                return false;
            }
        }
        if let Some(after) = self.expires_after {
            if value.expiration_date < after {
                return false;
            }
        }
        if let Some(before) = self.expires_before {
            if value.expiration_date >= before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Permission;
    use chrono::Duration;

    fn entry() -> (AceKey, AceValue) {
        let org = Identifier::from_parts(3, 1);
        (
            AceKey::new(
                AclKey::single(org).child(Identifier::from_parts(3, 2)),
                Principal::Role("r1".to_string()),
            ),
            AceValue::new(
                PermissionSet::of(&[Permission::Read]),
                SecurableObjectType::Role,
                Utc::now() + Duration::hours(1),
            ),
        )
    }

    #[test]
    fn expired_value_hides_permissions() {
        let (_, mut value) = entry();
        let now = Utc::now();
        assert!(value.is_active_at(now));
        value.expiration_date = now - Duration::seconds(1);
        assert!(value.active_permissions(now).is_empty());
        assert!(!value.permissions.is_empty());
    }

    #[test]
    fn query_axes_filter_independently() {
        let (key, value) = entry();
        assert!(AceQuery::default().matches(&key, &value));
        assert!(AceQuery::by_root(key.acl_key.root()).matches(&key, &value));
        assert!(!AceQuery::by_root(Identifier::from_parts(9, 9)).matches(&key, &value));
        assert!(!AceQuery::by_principal(Principal::User("u".to_string())).matches(&key, &value));

        let query = AceQuery {
            principal_type: Some(PrincipalType::Role),
            any_permission: Some(PermissionSet::of(&[Permission::Read, Permission::Owner])),
            expires_before: Some(Utc::now() + Duration::hours(2)),
            ..Default::default()
        };
        assert!(query.matches(&key, &value));

        let query = AceQuery {
            any_permission: Some(PermissionSet::of(&[Permission::Write])),
            ..Default::default()
        };
        assert!(!query.matches(&key, &value));
    }

    #[test]
    fn unknown_stored_type_degrades() {
        assert_eq!(
            SecurableObjectType::from_stored(Some("study")),
            SecurableObjectType::Study
        );
        assert_eq!(
            SecurableObjectType::from_stored(None),
            SecurableObjectType::Unknown
        );
        assert_eq!(
            SecurableObjectType::from_stored(Some("spaceship")),
            SecurableObjectType::Unknown
        );
    }

    #[test]
    fn never_expires_is_far_future() {
        assert!(never_expires() > Utc::now() + Duration::days(365 * 1000));
    }
}
