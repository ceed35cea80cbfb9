pub mod ace;
pub mod acl_key;
pub mod audit_event;
pub mod identifier;
pub mod permission;
pub mod principal;
pub mod range;
pub mod reservation;

pub use ace::{never_expires, Ace, AceKey, AceQuery, AceValue, SecurableObjectType};
pub use acl_key::AclKey;
pub use audit_event::{AuditEvent, AuditEventType};
pub use identifier::{Identifier, PARTITION_COUNT, RESERVED_SYSTEM_IDS};
pub use permission::{Permission, PermissionSet};
pub use principal::{Principal, PrincipalType, SecurablePrincipal, SecurablePrincipalResponse};
pub use range::{Range, ScrollResult};
pub use reservation::Reservation;
