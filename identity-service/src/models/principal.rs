//! Principal model - identities that can hold permissions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AclKey, Identifier};

/// Principal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    Role,
    Organization,
    Service,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "user",
            PrincipalType::Role => "role",
            PrincipalType::Organization => "organization",
            PrincipalType::Service => "service",
        }
    }
}

impl std::str::FromStr for PrincipalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(PrincipalType::User),
            "role" => Ok(PrincipalType::Role),
            "organization" => Ok(PrincipalType::Organization),
            "service" => Ok(PrincipalType::Service),
            _ => Err(format!("Invalid principal type: {}", s)),
        }
    }
}

/// An identity. Ordered by type, then id, so sets of principals iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    User(String),
    Role(String),
    Organization(String),
    Service(String),
}

impl Principal {
    pub fn new(principal_type: PrincipalType, id: impl Into<String>) -> Self {
        let id = id.into();
        match principal_type {
            PrincipalType::User => Principal::User(id),
            PrincipalType::Role => Principal::Role(id),
            PrincipalType::Organization => Principal::Organization(id),
            PrincipalType::Service => Principal::Service(id),
        }
    }

    pub fn principal_type(&self) -> PrincipalType {
        match self {
            Principal::User(_) => PrincipalType::User,
            Principal::Role(_) => PrincipalType::Role,
            Principal::Organization(_) => PrincipalType::Organization,
            Principal::Service(_) => PrincipalType::Service,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Principal::User(id)
            | Principal::Role(id)
            | Principal::Organization(id)
            | Principal::Service(id) => id,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.principal_type().as_str(), self.id())
    }
}

/// A principal with a stable position in the authorization hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurablePrincipal {
    pub acl_key: AclKey,
    pub principal: Principal,
    pub title: String,
    pub description: String,
}

impl SecurablePrincipal {
    pub fn new(
        acl_key: AclKey,
        principal: Principal,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            acl_key,
            principal,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Id of the object this principal's AclKey addresses.
    pub fn id(&self) -> Identifier {
        self.acl_key.leaf()
    }

    /// Owning organization of a role, the first element of its AclKey.
    pub fn organization_id(&self) -> Option<Identifier> {
        match self.principal {
            Principal::Role(_) => Some(self.acl_key.root()),
            _ => None,
        }
    }
}

/// Securable principal response for API.
#[derive(Debug, Serialize)]
pub struct SecurablePrincipalResponse {
    pub acl_key: AclKey,
    pub principal: Principal,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Identifier>,
}

impl From<SecurablePrincipal> for SecurablePrincipalResponse {
    fn from(p: SecurablePrincipal) -> Self {
        let organization_id = p.organization_id();
        Self {
            acl_key: p.acl_key,
            principal: p.principal,
            title: p.title,
            description: p.description,
            organization_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_carries_organization() {
        let org = Identifier::from_parts(2, 10);
        let role = Identifier::from_parts(2, 11);
        let principal = SecurablePrincipal::new(
            AclKey::single(org).child(role),
            Principal::Role("org1|readers".to_string()),
            "Readers",
            "",
        );
        assert_eq!(principal.organization_id(), Some(org));
        assert_eq!(principal.id(), role);

        let user = SecurablePrincipal::new(
            AclKey::single(role),
            Principal::User("alice".to_string()),
            "Alice",
            "",
        );
        assert_eq!(user.organization_id(), None);
    }

    #[test]
    fn orders_by_type_then_id() {
        let mut principals = vec![
            Principal::Role("b".to_string()),
            Principal::User("z".to_string()),
            Principal::Role("a".to_string()),
        ];
        principals.sort();
        assert_eq!(
            principals,
            vec![
                Principal::User("z".to_string()),
                Principal::Role("a".to_string()),
                Principal::Role("b".to_string()),
            ]
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Principal::Service("system".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "service", "id": "system"}));
        assert_eq!(
            "Organization".parse::<PrincipalType>().unwrap(),
            PrincipalType::Organization
        );
    }
}
