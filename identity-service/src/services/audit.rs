//! Audit sink. Storage of audit records lives outside this service; events
//! are handed to a sink and forgotten.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::models::{AuditEvent, AuditEventType};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits every event as a structured `tracing` event on the `audit` target.
#[derive(Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let principal = event.principal.as_ref().map(|p| p.to_string());
        let target = event.target.as_ref().map(|k| k.to_string());
        let data = event.event_data.as_ref().map(|d| d.to_string());
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            event_type = %event.event_type_code,
            principal = principal.as_deref(),
            acl_key = target.as_deref(),
            data = data.as_deref(),
            "Audit event"
        );
    }
}

/// Keeps events in memory for inspection.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.is(event_type))
            .count()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => tracing::error!("Audit recording mutex poisoned: {}", e),
        }
    }
}
