//! Reservation model - binding of a unique name to a securable object id.

use serde::{Deserialize, Serialize};

use super::{AclKey, Identifier, SecurableObjectType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub acl_key: AclKey,
    pub securable_object_type: SecurableObjectType,
    pub securable_object_id: Identifier,
    pub securable_object_name: String,
}

impl Reservation {
    pub fn new(
        acl_key: AclKey,
        securable_object_type: SecurableObjectType,
        securable_object_name: impl Into<String>,
    ) -> Self {
        Self {
            securable_object_id: acl_key.leaf(),
            acl_key,
            securable_object_type,
            securable_object_name: securable_object_name.into(),
        }
    }
}
