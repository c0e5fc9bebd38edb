//! Audit sink contract + in-memory log.

use std::sync::{Arc, RwLock};

use thiserror::Error;

use bursar_core::TenantId;

use crate::entry::{AuditEntry, AuditEntryId};

/// Audit write failure.
///
/// Callers must treat this as fatal to the operation being documented
/// (fail-closed): a mutation whose audit write fails must not commit, and a
/// privileged read whose audit write fails must return no data.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only audit sink.
///
/// `record` is the only mutating operation; no update or delete exists on
/// this contract by design.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<AuditEntryId, AuditError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, entry: AuditEntry) -> Result<AuditEntryId, AuditError> {
        (**self).record(entry)
    }
}

/// In-memory append-only audit log.
///
/// Intended for tests/dev. Query methods live on the concrete type, not the
/// sink trait, so consumers holding a `dyn AuditSink` can only append.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn for_tenant(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| {
                e.iter()
                    .filter(|entry| entry.tenant_id == Some(tenant_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn for_entity(&self, entity_kind: &str, entity_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| {
                e.iter()
                    .filter(|entry| entry.entity_kind == entity_kind && entry.entity_id == entity_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<AuditEntryId, AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError::Unavailable("lock poisoned".to_string()))?;
        let id = entry.id;
        entries.push(entry);
        Ok(id)
    }
}

/// Audit sink that always fails.
///
/// Fault injection for fail-closed tests: a privileged read or ledger
/// mutation wired to this sink must abort.
#[derive(Debug, Default)]
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn record(&self, _entry: AuditEntry) -> Result<AuditEntryId, AuditError> {
        Err(AuditError::Unavailable("injected failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use bursar_core::SubjectId;
    use chrono::Utc;

    #[test]
    fn record_appends_and_queries_by_entity() {
        let log = InMemoryAuditLog::new();
        let actor = SubjectId::new();

        let entry = AuditEntry::new("payment", "p-1", AuditAction::Created, actor, Utc::now());
        log.record(entry).unwrap();
        let entry = AuditEntry::new("payment", "p-1", AuditAction::Decided, actor, Utc::now());
        log.record(entry).unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.for_entity("payment", "p-1").len(), 2);
        assert!(log.for_entity("payment", "p-2").is_empty());
    }

    #[test]
    fn failing_sink_rejects_writes() {
        let sink = FailingAuditSink;
        let entry = AuditEntry::new(
            "student_record",
            "s-1",
            AuditAction::PrivilegedRead,
            SubjectId::new(),
            Utc::now(),
        );
        assert!(sink.record(entry).is_err());
    }
}
