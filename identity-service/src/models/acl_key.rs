//! AclKey model - path of identifiers from a root object to a nested object.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Identifier;

/// Ordered, non-empty path locating an object in the authorization hierarchy,
/// e.g. `[organization]` or `[organization, role]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<Identifier>", into = "Vec<Identifier>")]
pub struct AclKey(Vec<Identifier>);

impl AclKey {
    pub fn single(id: Identifier) -> Self {
        Self(vec![id])
    }

    /// Returns `None` for an empty path.
    pub fn from_ids(ids: Vec<Identifier>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self(ids))
        }
    }

    /// Key formed by appending `id` to `prefix`.
    pub fn with_prefix(prefix: &[Identifier], id: Identifier) -> Self {
        let mut ids = Vec::with_capacity(prefix.len() + 1);
        ids.extend_from_slice(prefix);
        ids.push(id);
        Self(ids)
    }

    pub fn child(&self, id: Identifier) -> Self {
        Self::with_prefix(&self.0, id)
    }

    pub fn root(&self) -> Identifier {
        self.0[0]
    }

    /// Last element, the id of the object this key addresses.
    pub fn leaf(&self) -> Identifier {
        self.0[self.0.len() - 1]
    }

    pub fn ids(&self) -> &[Identifier] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_uuids(&self) -> Vec<Uuid> {
        self.0.iter().map(Identifier::as_uuid).collect()
    }

    pub fn from_uuids(uuids: Vec<Uuid>) -> Option<Self> {
        Self::from_ids(uuids.into_iter().map(Identifier::new).collect())
    }
}

impl TryFrom<Vec<Identifier>> for AclKey {
    type Error = String;

    fn try_from(ids: Vec<Identifier>) -> Result<Self, Self::Error> {
        Self::from_ids(ids).ok_or_else(|| "acl key must not be empty".to_string())
    }
}

impl From<AclKey> for Vec<Identifier> {
    fn from(key: AclKey) -> Self {
        key.0
    }
}

impl fmt::Display for AclKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(AclKey::from_ids(vec![]).is_none());
        let parsed: Result<AclKey, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());
    }

    #[test]
    fn prefix_and_root() {
        let org = Identifier::from_parts(1, 1);
        let role = Identifier::from_parts(1, 2);
        let key = AclKey::single(org).child(role);
        assert_eq!(key.root(), org);
        assert_eq!(key.leaf(), role);
        assert_eq!(key, AclKey::with_prefix(&[org], role));
        assert_eq!(key.len(), 2);
    }

    #[test]
    fn serializes_as_plain_array() {
        let key = AclKey::single(Identifier::system(1));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "[\"00000000-0000-0000-0000-000000000001\"]");
        let back: AclKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
