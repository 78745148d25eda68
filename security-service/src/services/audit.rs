//! Append-only audit trail.
//!
//! Writes are dispatched onto a background task: the caller never waits on
//! the store and a failed write only reaches the error log.

use std::sync::Arc;

use serde_json::Value;

use crate::clock::Clock;
use crate::models::{AuditAction, AuditLogEntry, ResourceType};
use crate::store::AuditStore;

/// Caller network details captured from the inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One auditable event, before it is stamped and stored.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, resource_type: ResourceType) -> Self {
        Self {
            user_id: None,
            action,
            resource_type,
            resource_id: None,
            metadata: None,
        }
    }

    pub fn actor(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn entry(&self, event: AuditEvent, client: Option<&ClientInfo>) -> AuditLogEntry {
        let mut entry = AuditLogEntry::new(event.action, event.resource_type, self.clock.now());
        entry.user_id = event.user_id;
        entry.resource_id = event.resource_id;
        entry.metadata = event.metadata;
        if let Some(client) = client {
            entry.ip_address = client.ip_address.clone();
            entry.user_agent = client.user_agent.clone();
        }
        entry
    }

    /// Fire-and-forget write.
    pub fn log_event(&self, event: AuditEvent, client: Option<&ClientInfo>) {
        let entry = self.entry(event, client);
        let store = self.store.clone();
        tokio::spawn(async move {
            write(store.as_ref(), &entry).await;
        });
    }

    /// Same as [`log_event`](Self::log_event) but completes once the write
    /// has been attempted. Still never fails.
    pub async fn record(&self, event: AuditEvent, client: Option<&ClientInfo>) {
        let entry = self.entry(event, client);
        write(self.store.as_ref(), &entry).await;
    }
}

async fn write(store: &dyn AuditStore, entry: &AuditLogEntry) {
    match store.insert_audit(entry).await {
        Ok(()) => tracing::debug!(
            action = %entry.action,
            resource_type = %entry.resource_type,
            user_id = ?entry.user_id,
            "Audit event recorded"
        ),
        Err(e) => tracing::error!(
            error = %e,
            action = %entry.action,
            resource_type = %entry.resource_type,
            user_id = ?entry.user_id,
            "Failed to write audit log"
        ),
    }
}
