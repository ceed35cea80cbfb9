//! Audit event model - records handed to the external audit sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{AclKey, Principal};

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PrincipalCreated,
    PrincipalDeleted,
    PermissionsGranted,
    PermissionsRevoked,
    MembershipAdded,
    MembershipRemoved,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PrincipalCreated => "principal_created",
            AuditEventType::PrincipalDeleted => "principal_deleted",
            AuditEventType::PermissionsGranted => "permissions_granted",
            AuditEventType::PermissionsRevoked => "permissions_revoked",
            AuditEventType::MembershipAdded => "membership_added",
            AuditEventType::MembershipRemoved => "membership_removed",
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type_code: String,
    pub principal: Option<Principal>,
    pub target: Option<AclKey>,
    pub event_data: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an event about a principal acting on, or being placed at, a target.
    pub fn new(
        event_type: AuditEventType,
        principal: Option<Principal>,
        target: Option<AclKey>,
        event_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type_code: event_type.as_str().to_string(),
            principal,
            target,
            event_data,
            created_utc: Utc::now(),
        }
    }

    pub fn is(&self, event_type: AuditEventType) -> bool {
        self.event_type_code == event_type.as_str()
    }
}
