//! Clearance recomputation: the explicit post-commit hook.
//!
//! Where a database would run a trigger, the ledger engine publishes an
//! event and this engine recomputes the affected (student, tenant, period)
//! clearance record from current obligation state. Blocking items are always
//! computed from the source of truth on demand; the stored record carries
//! only the derived status and the sticky officer override.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::info;

use bursar_audit::{AuditAction, AuditEntry, AuditSink};
use bursar_auth::{
    EvaluationContext, Operation, PolicySet, Principal, ResourceDescriptor, ResourceKind, evaluate,
};
use bursar_clearance::{BlockingItems, ClearanceRecord, ClearanceStatus, blocking_items};
use bursar_core::{PeriodId, SubjectId, TenantId};
use bursar_events::{EventBus, EventEnvelope};
use bursar_ledger::{LedgerEvent, Obligation};

use crate::ledger_engine::EngineError;
use crate::worker::{EventWorker, WorkerHandle};

/// Read access to current obligation state, scoped to one clearance cell.
///
/// Implemented by the ledger engine; the seam keeps this engine testable
/// against canned obligation sets.
pub trait ObligationSource: Send + Sync {
    fn obligations_for(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Vec<Obligation>;
}

impl<S> ObligationSource for Arc<S>
where
    S: ObligationSource + ?Sized,
{
    fn obligations_for(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Vec<Obligation> {
        (**self).obligations_for(tenant_id, student, period_id)
    }
}

type ClearanceKey = (TenantId, SubjectId, PeriodId);

/// Derives and stores clearance records, and owns the officer override path.
pub struct ClearanceEngine<A, S> {
    policies: PolicySet,
    audit: A,
    obligations: S,
    records: RwLock<HashMap<ClearanceKey, ClearanceRecord>>,
}

impl<A, S> ClearanceEngine<A, S>
where
    A: AuditSink,
    S: ObligationSource,
{
    pub fn new(policies: PolicySet, audit: A, obligations: S) -> Self {
        Self {
            policies,
            audit,
            obligations,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Obligations currently blocking this student's clearance, computed on
    /// demand from ledger state.
    pub fn blocking(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> BlockingItems {
        let obligations = self.obligations.obligations_for(tenant_id, student, period_id);
        blocking_items(obligations.iter())
    }

    /// Recompute the stored clearance record. Idempotent; sticky overrides
    /// survive.
    pub fn recompute(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Result<ClearanceStatus, EngineError> {
        let blocking = self.blocking(tenant_id, student, period_id);
        let now = Utc::now();
        let mut records = self.write_records()?;
        let record = records
            .entry((tenant_id, student, period_id))
            .or_insert_with(|| ClearanceRecord::new(student, tenant_id, period_id, now));
        record.recompute(&blocking, now);
        Ok(record.status)
    }

    /// Event handler for the post-commit hook. Idempotent: recomputation of
    /// an unchanged scope is a no-op, so at-least-once delivery is safe.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<LedgerEvent>,
    ) -> Result<(), EngineError> {
        if let LedgerEvent::ObligationStatusChanged {
            tenant_id,
            subject_id,
            period_id,
            ..
        } = envelope.payload()
        {
            self.recompute(*tenant_id, *subject_id, *period_id)?;
        }
        Ok(())
    }

    pub fn record(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Option<ClearanceRecord> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(&(tenant_id, student, period_id)).cloned())
    }

    pub fn status(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Option<ClearanceStatus> {
        self.record(tenant_id, student, period_id).map(|r| r.status)
    }

    /// Officer-set sticky override. Requires a reason; audited; never
    /// auto-reverted by recomputation.
    pub fn override_clearance(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
        reason: impl Into<String>,
    ) -> Result<ClearanceRecord, EngineError> {
        self.authorize(actor, tenant_id, student)?;
        let now = Utc::now();
        let reason = reason.into();

        let mut records = self.write_records()?;
        let record = records
            .entry((tenant_id, student, period_id))
            .or_insert_with(|| ClearanceRecord::new(student, tenant_id, period_id, now));
        let before = serde_json::to_value(&*record).unwrap_or(serde_json::Value::Null);

        let mut updated = record.clone();
        updated.set_override(reason, now)?;

        self.audit.record(
            AuditEntry::new(
                "clearance",
                format!("{student}:{period_id}"),
                AuditAction::Overridden,
                actor.subject_id,
                now,
            )
            .with_tenant(tenant_id)
            .with_before(before)
            .with_after(serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null)),
        )?;

        *record = updated.clone();
        info!(tenant = %tenant_id, student = %student, "clearance overridden");
        Ok(updated)
    }

    /// Explicit officer action removing the override; the record returns to
    /// recomputed truth immediately.
    pub fn clear_override(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Result<ClearanceRecord, EngineError> {
        self.authorize(actor, tenant_id, student)?;
        let blocking = self.blocking(tenant_id, student, period_id);
        let now = Utc::now();

        let mut records = self.write_records()?;
        let record = records
            .get_mut(&(tenant_id, student, period_id))
            .ok_or_else(|| EngineError::Consistency("no clearance record to clear".to_string()))?;
        let before = serde_json::to_value(&*record).unwrap_or(serde_json::Value::Null);

        let mut updated = record.clone();
        updated.clear_override(&blocking, now)?;

        self.audit.record(
            AuditEntry::new(
                "clearance",
                format!("{student}:{period_id}"),
                AuditAction::OverrideCleared,
                actor.subject_id,
                now,
            )
            .with_tenant(tenant_id)
            .with_before(before)
            .with_after(serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null)),
        )?;

        *record = updated.clone();
        info!(tenant = %tenant_id, student = %student, "clearance override cleared");
        Ok(updated)
    }

    fn authorize(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
    ) -> Result<(), EngineError> {
        let resource =
            ResourceDescriptor::student_owned(ResourceKind::Clearance, tenant_id, student);
        evaluate(
            &self.policies,
            actor,
            &resource,
            Operation::Update,
            &EvaluationContext::default(),
        )?;
        Ok(())
    }

    fn write_records(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ClearanceKey, ClearanceRecord>>, EngineError>
    {
        self.records
            .write()
            .map_err(|_| EngineError::Consistency("clearance lock poisoned".to_string()))
    }
}

/// Spawn the recomputation worker: subscribes to ledger events and keeps
/// clearance records current.
pub fn spawn_clearance_worker<A, S, B>(
    engine: Arc<ClearanceEngine<A, S>>,
    bus: B,
) -> WorkerHandle
where
    A: AuditSink + 'static,
    S: ObligationSource + 'static,
    B: EventBus<EventEnvelope<LedgerEvent>> + Send + Sync + 'static,
{
    EventWorker::spawn("clearance-recompute", bus, None, move |envelope| {
        engine.apply_envelope(&envelope)
    })
}
