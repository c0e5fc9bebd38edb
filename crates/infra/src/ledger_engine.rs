//! The ledger engine: transactional write path for obligations, payments,
//! allocations and waivers.
//!
//! Every mutating operation runs the same pipeline:
//!
//! 1. authorize the acting principal (policy evaluation, tenant-active check)
//! 2. take the single write lock; concurrent writers serialize here, so
//!    balance checks always see a consistent snapshot
//! 3. validate against the locked state; nothing is mutated yet
//! 4. write the audit entry (a failed audit write aborts the operation)
//! 5. apply the mutation and recompute derived obligation status
//! 6. release the lock, then publish events and enqueue notifications
//!
//! Steps 2–5 are the transaction: all-or-nothing, no partial application, no
//! audit entry for a mutation that did not commit. External IO never happens
//! inside the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use bursar_audit::{AuditAction, AuditEntry, AuditError, AuditSink};
use bursar_auth::{
    AuthzError, EvaluationContext, Operation, PolicySet, Principal, ResourceDescriptor,
    ResourceKind, evaluate,
};
use bursar_core::{AggregateId, DomainError, PeriodId, SubjectId, TenantId};
use bursar_events::{EventBus, EventEnvelope};
use bursar_ledger::{
    Allocation, AllocationId, AllocationTarget, AppealId, LedgerError, LedgerEvent, Obligation,
    ObligationId, ObligationKind, ObligationStatus, OverrideStatus, Payment, PaymentId,
    PaymentMethod, ReceiptRef, Waiver, WaiverId, derive_status,
};
use bursar_observability::AlertHook;
use bursar_tenancy::TenantLookup;

use crate::notifications::{
    NotificationMessage, NotificationQueue, NotificationType, RecipientRef,
};

/// Ledger engine operation failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Authorization denial (uniform "not permitted" to untrusted callers).
    #[error(transparent)]
    Denied(#[from] AuthzError),

    /// Deterministic validation failure; detail guides caller correction.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The audit write failed; the documented mutation was aborted.
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),

    #[error("unknown tenant")]
    UnknownTenant,

    /// The organization is suspended or inactive.
    #[error("organization is not active")]
    TenantNotActive,

    /// Cross-tenant mixing inside one transaction.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Invariant violation detected at commit time. Aborts the transaction,
    /// raises an alert, and suggests retry to the caller.
    #[error("consistency violation: {0}")]
    Consistency(String),
}

#[derive(Debug, Default)]
struct LedgerState {
    obligations: HashMap<ObligationId, Obligation>,
    payments: HashMap<PaymentId, Payment>,
    allocations: HashMap<AllocationId, Allocation>,
    waivers: HashMap<WaiverId, Waiver>,
    by_payment: HashMap<PaymentId, Vec<AllocationId>>,
    by_obligation: HashMap<ObligationId, Vec<AllocationId>>,
}

impl LedgerState {
    /// Sum of allocations counting toward an obligation's settlement:
    /// unvoided rows whose payment is verified.
    fn verified_total(&self, obligation_id: ObligationId) -> i64 {
        self.by_obligation
            .get(&obligation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.allocations.get(id))
                    .filter(|a| !a.is_voided())
                    .filter(|a| {
                        self.payments
                            .get(&a.payment_id())
                            .is_some_and(Payment::is_verified)
                    })
                    .map(Allocation::amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Unvoided allocation total already attached to a payment.
    fn allocated_for_payment(&self, payment_id: PaymentId) -> i64 {
        self.by_payment
            .get(&payment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.allocations.get(id))
                    .filter(|a| !a.is_voided())
                    .map(Allocation::amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Per-obligation unvoided contribution of one payment.
    fn payment_contributions(&self, payment_id: PaymentId) -> Vec<(ObligationId, i64)> {
        let mut contributions: HashMap<ObligationId, i64> = HashMap::new();
        if let Some(ids) = self.by_payment.get(&payment_id) {
            for allocation in ids.iter().filter_map(|id| self.allocations.get(id)) {
                if !allocation.is_voided() {
                    *contributions.entry(allocation.obligation_id()).or_insert(0) +=
                        allocation.amount();
                }
            }
        }
        contributions.into_iter().collect()
    }

    /// Recompute one obligation's derived status from the current snapshot.
    ///
    /// Idempotent and sticky-aware; returns a status-change event when the
    /// stored status actually moved.
    fn recompute(
        &mut self,
        obligation_id: ObligationId,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEvent>, EngineError> {
        let total = self.verified_total(obligation_id);
        let obligation = self
            .obligations
            .get_mut(&obligation_id)
            .ok_or(LedgerError::UnknownObligation(obligation_id))?;

        let derived = derive_status(obligation.amount(), total);
        Ok(obligation.apply_derived(derived).map(|previous| {
            LedgerEvent::ObligationStatusChanged {
                obligation_id,
                tenant_id: obligation.tenant_id(),
                subject_id: obligation.subject_id(),
                period_id: obligation.period_id(),
                from: previous,
                to: obligation.status(),
                occurred_at: now,
            }
        }))
    }
}

/// The transactional ledger service.
///
/// Obligation and payment rows are the contended resources; only this engine
/// mutates them, always inside one lock-scoped transaction. Reads are
/// lock-free beyond the shared read guard.
pub struct LedgerEngine<A, B, T> {
    policies: PolicySet,
    audit: A,
    bus: B,
    tenants: T,
    notifications: NotificationQueue,
    alerts: Arc<dyn AlertHook>,
    state: RwLock<LedgerState>,
    sequence: AtomicU64,
}

impl<A, B, T> LedgerEngine<A, B, T>
where
    A: AuditSink,
    B: EventBus<EventEnvelope<LedgerEvent>>,
    T: TenantLookup,
{
    pub fn new(
        policies: PolicySet,
        audit: A,
        bus: B,
        tenants: T,
        notifications: NotificationQueue,
        alerts: Arc<dyn AlertHook>,
    ) -> Self {
        Self {
            policies,
            audit,
            bus,
            tenants,
            notifications,
            alerts,
            state: RwLock::new(LedgerState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Obligation creation
    // ────────────────────────────────────────────────────────────────────

    pub fn assign_fee(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
        fee_type: impl Into<String>,
        required_for_clearance: bool,
        amount: i64,
    ) -> Result<Obligation, EngineError> {
        self.create_obligation(
            actor,
            tenant_id,
            student,
            period_id,
            ObligationKind::Fee {
                fee_type: fee_type.into(),
                required_for_clearance,
            },
            amount,
        )
    }

    pub fn impose_fine(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
        reason: impl Into<String>,
        amount: i64,
    ) -> Result<Obligation, EngineError> {
        self.create_obligation(
            actor,
            tenant_id,
            student,
            period_id,
            ObligationKind::Fine {
                reason: reason.into(),
            },
            amount,
        )
    }

    fn create_obligation(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
        kind: ObligationKind,
        amount: i64,
    ) -> Result<Obligation, EngineError> {
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Obligation, tenant_id, student),
            Operation::Create,
        )?;
        let now = Utc::now();

        let is_fee = kind.is_fee();
        let obligation = Obligation::new(
            ObligationId::new(AggregateId::new()),
            student,
            tenant_id,
            period_id,
            kind,
            amount,
            now,
        )?;
        let obligation_id = obligation.id_typed();

        {
            let mut state = self.write_state()?;
            self.audit.record(
                AuditEntry::new(
                    "obligation",
                    obligation_id,
                    AuditAction::Created,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_after(snapshot(&obligation)),
            )?;
            state.obligations.insert(obligation_id, obligation.clone());
        }

        let event = if is_fee {
            LedgerEvent::FeeAssigned {
                obligation_id,
                tenant_id,
                subject_id: student,
                period_id,
                amount,
                occurred_at: now,
            }
        } else {
            LedgerEvent::FineImposed {
                obligation_id,
                tenant_id,
                subject_id: student,
                period_id,
                amount,
                occurred_at: now,
            }
        };
        self.publish(tenant_id, vec![event]);

        info!(tenant = %tenant_id, obligation = %obligation_id, amount, "obligation created");
        Ok(obligation)
    }

    // ────────────────────────────────────────────────────────────────────
    // Payments
    // ────────────────────────────────────────────────────────────────────

    pub fn record_payment(
        &self,
        actor: &Principal,
        tenant_id: TenantId,
        subject: SubjectId,
        amount: i64,
        method: PaymentMethod,
        proof_ref: Option<ReceiptRef>,
    ) -> Result<Payment, EngineError> {
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Payment, tenant_id, subject),
            Operation::Create,
        )?;
        let now = Utc::now();

        let payment = Payment::new(
            PaymentId::new(AggregateId::new()),
            subject,
            tenant_id,
            amount,
            method,
            proof_ref,
            now,
        )?;
        let payment_id = payment.id_typed();

        {
            let mut state = self.write_state()?;
            self.audit.record(
                AuditEntry::new(
                    "payment",
                    payment_id,
                    AuditAction::Created,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_after(snapshot(&payment)),
            )?;
            state.payments.insert(payment_id, payment.clone());
        }

        self.publish(
            tenant_id,
            vec![LedgerEvent::PaymentRecorded {
                payment_id,
                tenant_id,
                subject_id: subject,
                amount,
                occurred_at: now,
            }],
        );

        info!(tenant = %tenant_id, payment = %payment_id, amount, %method, "payment recorded");
        Ok(payment)
    }

    /// Allocate a payment across obligations.
    ///
    /// All-or-nothing: if any target fails validation (over-allocation,
    /// mismatched sum, cross-tenant target), no allocation is created. With
    /// `assert_full` the targets must sum to the payment amount exactly.
    pub fn allocate(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
        targets: &[AllocationTarget],
        assert_full: bool,
    ) -> Result<Vec<Allocation>, EngineError> {
        let (tenant_id, subject_id) = self.payment_scope(payment_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Payment, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();

        let (allocations, events) = {
            let mut state = self.write_state()?;

            let payment = state
                .payments
                .get(&payment_id)
                .ok_or(LedgerError::UnknownPayment(payment_id))?;
            if !payment.is_pending() {
                return Err(LedgerError::AlreadyDecided {
                    payment_id,
                    status: payment.status(),
                }
                .into());
            }
            let payment_amount = payment.amount();

            // Validation pass: nothing is mutated until every target clears.
            let mut requested_per_obligation: HashMap<ObligationId, i64> = HashMap::new();
            let mut requested_total: i64 = 0;
            for target in targets {
                if target.amount <= 0 {
                    return Err(LedgerError::InvalidAmount.into());
                }
                let obligation = state
                    .obligations
                    .get(&target.obligation_id)
                    .ok_or(LedgerError::UnknownObligation(target.obligation_id))?;
                if obligation.tenant_id() != tenant_id {
                    return Err(EngineError::TenantIsolation(format!(
                        "obligation {} belongs to another tenant",
                        target.obligation_id
                    )));
                }
                *requested_per_obligation
                    .entry(target.obligation_id)
                    .or_insert(0) += target.amount;
                requested_total += target.amount;
            }

            for (&obligation_id, &requested) in &requested_per_obligation {
                let obligation = state
                    .obligations
                    .get(&obligation_id)
                    .ok_or(LedgerError::UnknownObligation(obligation_id))?;
                let remaining = obligation.remaining(state.verified_total(obligation_id));
                if requested > remaining {
                    return Err(LedgerError::OverAllocation {
                        obligation_id,
                        requested,
                        remaining,
                    }
                    .into());
                }
            }

            let already_allocated = state.allocated_for_payment(payment_id);
            if assert_full && already_allocated + requested_total != payment_amount {
                return Err(LedgerError::AllocationMismatch {
                    payment_amount,
                    allocated: already_allocated + requested_total,
                }
                .into());
            }
            if already_allocated + requested_total > payment_amount {
                return Err(LedgerError::AllocationMismatch {
                    payment_amount,
                    allocated: already_allocated + requested_total,
                }
                .into());
            }

            let mut allocations = Vec::with_capacity(targets.len());
            for target in targets {
                allocations.push(Allocation::new(
                    AllocationId::new(AggregateId::new()),
                    payment_id,
                    target.obligation_id,
                    target.amount,
                    now,
                )?);
            }

            self.audit.record(
                AuditEntry::new(
                    "payment",
                    payment_id,
                    AuditAction::Updated,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_after(snapshot(&allocations)),
            )?;

            // Apply: infallible from here on.
            let obligation_ids: Vec<ObligationId> =
                requested_per_obligation.keys().copied().collect();
            for allocation in &allocations {
                let id = allocation.id_typed();
                state.allocations.insert(id, allocation.clone());
                state.by_payment.entry(payment_id).or_default().push(id);
                state
                    .by_obligation
                    .entry(allocation.obligation_id())
                    .or_default()
                    .push(id);
            }

            let mut events = vec![LedgerEvent::PaymentAllocated {
                payment_id,
                tenant_id,
                obligation_ids: obligation_ids.clone(),
                occurred_at: now,
            }];
            // Every allocation create/void recomputes. Derived status only
            // moves on verification, so this is normally a no-op.
            for obligation_id in obligation_ids {
                if let Some(event) = state.recompute(obligation_id, now)? {
                    events.push(event);
                }
            }

            (allocations, events)
        };

        self.publish(tenant_id, events);
        Ok(allocations)
    }

    /// Verify a pending payment, promoting its allocations into the
    /// obligations' verified totals.
    pub fn verify_payment(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
    ) -> Result<Payment, EngineError> {
        let (tenant_id, subject_id) = self.payment_scope(payment_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Payment, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();

        let (payment, events) = {
            let mut state = self.write_state()?;

            let current = state
                .payments
                .get(&payment_id)
                .ok_or(LedgerError::UnknownPayment(payment_id))?;
            let before = snapshot(current);
            let mut updated = current.clone();
            updated.verify(actor.subject_id, now)?;

            // Commit-time guard: two pending payments may each have been
            // fully allocated against the same obligation; the first
            // verification wins and the second must abort here.
            let contributions = state.payment_contributions(payment_id);
            for (obligation_id, contribution) in &contributions {
                let obligation = state
                    .obligations
                    .get(obligation_id)
                    .ok_or(LedgerError::UnknownObligation(*obligation_id))?;
                let verified = state.verified_total(*obligation_id);
                if verified + contribution > obligation.amount() {
                    let message = format!(
                        "verifying payment {payment_id} would over-settle obligation {obligation_id} \
                         ({verified} + {contribution} > {})",
                        obligation.amount()
                    );
                    self.alerts.raise("ledger_engine", &message);
                    return Err(EngineError::Consistency(message));
                }
            }

            self.audit.record(
                AuditEntry::new(
                    "payment",
                    payment_id,
                    AuditAction::Decided,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(before)
                .with_after(snapshot(&updated)),
            )?;

            state.payments.insert(payment_id, updated.clone());
            let mut events = vec![LedgerEvent::PaymentVerified {
                payment_id,
                tenant_id,
                subject_id,
                occurred_at: now,
            }];
            for (obligation_id, _) in contributions {
                if let Some(event) = state.recompute(obligation_id, now)? {
                    events.push(event);
                }
            }

            (updated, events)
        };

        self.publish(tenant_id, events);
        self.notify(
            tenant_id,
            subject_id,
            NotificationType::PaymentVerified,
            serde_json::json!({ "payment_id": payment_id, "amount": payment.amount() }),
            now,
        );

        info!(tenant = %tenant_id, payment = %payment_id, "payment verified");
        Ok(payment)
    }

    /// Reject a payment, voiding its allocations.
    ///
    /// The cancellation path: idempotent against replay (rejecting an
    /// already-rejected payment returns it unchanged), and also the reversal
    /// path for an erroneously verified payment.
    pub fn reject_payment(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
        reason: impl Into<String>,
    ) -> Result<Payment, EngineError> {
        let (tenant_id, subject_id) = self.payment_scope(payment_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Payment, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();
        let reason = reason.into();

        let (payment, events) = {
            let mut state = self.write_state()?;

            let current = state
                .payments
                .get(&payment_id)
                .ok_or(LedgerError::UnknownPayment(payment_id))?;
            let before = snapshot(current);
            let mut updated = current.clone();
            if !updated.reject(actor.subject_id, reason.clone(), now)? {
                // Replay of an already-rejected payment: no-op, no audit.
                return Ok(updated);
            }

            self.audit.record(
                AuditEntry::new(
                    "payment",
                    payment_id,
                    AuditAction::Decided,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(before)
                .with_after(snapshot(&updated)),
            )?;

            state.payments.insert(payment_id, updated.clone());

            let allocation_ids: Vec<AllocationId> = state
                .by_payment
                .get(&payment_id)
                .cloned()
                .unwrap_or_default();
            let mut touched = Vec::new();
            for id in allocation_ids {
                if let Some(allocation) = state.allocations.get_mut(&id) {
                    if !allocation.is_voided() {
                        allocation.void(now);
                        touched.push(allocation.obligation_id());
                    }
                }
            }
            let mut seen = std::collections::HashSet::new();
            touched.retain(|id| seen.insert(*id));

            let mut events = vec![LedgerEvent::PaymentRejected {
                payment_id,
                tenant_id,
                subject_id,
                reason: reason.clone(),
                occurred_at: now,
            }];
            for obligation_id in touched {
                if let Some(event) = state.recompute(obligation_id, now)? {
                    events.push(event);
                }
            }

            (updated, events)
        };

        self.publish(tenant_id, events);
        self.notify(
            tenant_id,
            subject_id,
            NotificationType::PaymentRejected,
            serde_json::json!({ "payment_id": payment_id, "reason": reason }),
            now,
        );

        info!(tenant = %tenant_id, payment = %payment_id, "payment rejected");
        Ok(payment)
    }

    // ────────────────────────────────────────────────────────────────────
    // Waivers and appeals
    // ────────────────────────────────────────────────────────────────────

    /// Grant a waiver, atomically setting the obligation's sticky `waived`
    /// override in the same transaction.
    pub fn grant_waiver(
        &self,
        actor: &Principal,
        obligation_id: ObligationId,
        reason: impl Into<String>,
        origin_appeal_id: Option<AppealId>,
    ) -> Result<Waiver, EngineError> {
        let (tenant_id, subject_id, period_id) = self.obligation_scope(obligation_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Waiver, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("waiver reason must not be empty").into());
        }

        let (waiver, events) = {
            let mut state = self.write_state()?;
            let obligation = state
                .obligations
                .get(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            let status_before = obligation.status();

            let waiver = Waiver::approved(
                WaiverId::new(AggregateId::new()),
                obligation_id,
                tenant_id,
                reason,
                actor.subject_id,
                origin_appeal_id,
                now,
            );

            self.audit.record(
                AuditEntry::new(
                    "waiver",
                    waiver.id_typed(),
                    AuditAction::Decided,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(snapshot(&status_before))
                .with_after(snapshot(&waiver)),
            )?;

            let obligation = state
                .obligations
                .get_mut(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            let previous = obligation.set_override(OverrideStatus::Waived);
            let status_now = obligation.status();
            state.waivers.insert(waiver.id_typed(), waiver.clone());

            let mut events = vec![LedgerEvent::WaiverGranted {
                waiver_id: waiver.id_typed(),
                obligation_id,
                tenant_id,
                origin_appeal_id,
                occurred_at: now,
            }];
            if previous != status_now {
                events.push(LedgerEvent::ObligationStatusChanged {
                    obligation_id,
                    tenant_id,
                    subject_id,
                    period_id,
                    from: previous,
                    to: status_now,
                    occurred_at: now,
                });
            }

            (waiver, events)
        };

        self.publish(tenant_id, events);
        self.notify(
            tenant_id,
            subject_id,
            NotificationType::WaiverApproved,
            serde_json::json!({ "obligation_id": obligation_id }),
            now,
        );

        info!(tenant = %tenant_id, obligation = %obligation_id, "waiver granted");
        Ok(waiver)
    }

    /// Reverse a previously granted waiver, restoring payment-derived truth.
    ///
    /// The one path that unsticks a `waived` status, audited with the same
    /// rigor as the grant.
    pub fn reject_waiver(
        &self,
        actor: &Principal,
        waiver_id: WaiverId,
    ) -> Result<Waiver, EngineError> {
        let obligation_id = {
            let state = self.read_state()?;
            state
                .waivers
                .get(&waiver_id)
                .map(Waiver::obligation_id)
                .ok_or(LedgerError::UnknownWaiver(waiver_id))?
        };
        let (tenant_id, subject_id, period_id) = self.obligation_scope(obligation_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Waiver, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();

        let (waiver, events) = {
            let mut state = self.write_state()?;

            let current = state
                .waivers
                .get(&waiver_id)
                .ok_or(LedgerError::UnknownWaiver(waiver_id))?;
            let before = snapshot(current);
            let mut updated = current.clone();
            updated.reject(actor.subject_id, now)?;

            let obligation = state
                .obligations
                .get(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            if obligation.status() != ObligationStatus::Override(OverrideStatus::Waived) {
                return Err(LedgerError::NoActiveOverride { obligation_id }.into());
            }

            self.audit.record(
                AuditEntry::new(
                    "waiver",
                    waiver_id,
                    AuditAction::Decided,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(before)
                .with_after(snapshot(&updated)),
            )?;

            state.waivers.insert(waiver_id, updated.clone());

            // Unstick: restore the status derived from verified allocations.
            let total = state.verified_total(obligation_id);
            let obligation = state
                .obligations
                .get_mut(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            let previous = obligation.status();
            let derived = derive_status(obligation.amount(), total);
            obligation.clear_override(derived)?;
            let status_now = obligation.status();

            let mut events = vec![LedgerEvent::WaiverRejected {
                waiver_id,
                obligation_id,
                tenant_id,
                occurred_at: now,
            }];
            if previous != status_now {
                events.push(LedgerEvent::ObligationStatusChanged {
                    obligation_id,
                    tenant_id,
                    subject_id,
                    period_id,
                    from: previous,
                    to: status_now,
                    occurred_at: now,
                });
            }

            (updated, events)
        };

        self.publish(tenant_id, events);
        self.notify(
            tenant_id,
            subject_id,
            NotificationType::WaiverRejected,
            serde_json::json!({ "obligation_id": obligation_id }),
            now,
        );

        info!(tenant = %tenant_id, waiver = %waiver_id, "waiver rejected");
        Ok(waiver)
    }

    /// Put an obligation under the sticky `appealed` override.
    pub fn mark_appealed(
        &self,
        actor: &Principal,
        obligation_id: ObligationId,
        appeal_id: AppealId,
    ) -> Result<Obligation, EngineError> {
        let (tenant_id, subject_id, period_id) = self.obligation_scope(obligation_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Obligation, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();

        let (obligation, events) = {
            let mut state = self.write_state()?;
            let current = state
                .obligations
                .get(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            if current.status().is_sticky() {
                return Err(DomainError::conflict(format!(
                    "obligation {obligation_id} is already {}",
                    current.status()
                ))
                .into());
            }
            let before = snapshot(current);

            self.audit.record(
                AuditEntry::new(
                    "obligation",
                    obligation_id,
                    AuditAction::Overridden,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(before),
            )?;

            let obligation = state
                .obligations
                .get_mut(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            let previous = obligation.set_override(OverrideStatus::Appealed);
            let updated = obligation.clone();

            let events = vec![
                LedgerEvent::ObligationAppealed {
                    obligation_id,
                    tenant_id,
                    appeal_id,
                    occurred_at: now,
                },
                LedgerEvent::ObligationStatusChanged {
                    obligation_id,
                    tenant_id,
                    subject_id,
                    period_id,
                    from: previous,
                    to: updated.status(),
                    occurred_at: now,
                },
            ];

            (updated, events)
        };

        self.publish(tenant_id, events);
        info!(tenant = %tenant_id, obligation = %obligation_id, "obligation appealed");
        Ok(obligation)
    }

    /// Resolve an appeal without a waiver: restore derived truth.
    pub fn clear_appeal(
        &self,
        actor: &Principal,
        obligation_id: ObligationId,
    ) -> Result<Obligation, EngineError> {
        let (tenant_id, subject_id, period_id) = self.obligation_scope(obligation_id)?;
        self.ensure_active(tenant_id)?;
        self.authorize(
            actor,
            &ResourceDescriptor::student_owned(ResourceKind::Obligation, tenant_id, subject_id),
            Operation::Update,
        )?;
        let now = Utc::now();

        let (obligation, events) = {
            let mut state = self.write_state()?;
            let current = state
                .obligations
                .get(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            if current.status() != ObligationStatus::Override(OverrideStatus::Appealed) {
                return Err(LedgerError::NoActiveOverride { obligation_id }.into());
            }
            let before = snapshot(current);

            self.audit.record(
                AuditEntry::new(
                    "obligation",
                    obligation_id,
                    AuditAction::OverrideCleared,
                    actor.subject_id,
                    now,
                )
                .with_tenant(tenant_id)
                .with_before(before),
            )?;

            let total = state.verified_total(obligation_id);
            let obligation = state
                .obligations
                .get_mut(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            let previous = obligation.status();
            let derived = derive_status(obligation.amount(), total);
            obligation.clear_override(derived)?;
            let updated = obligation.clone();

            let events = vec![
                LedgerEvent::AppealCleared {
                    obligation_id,
                    tenant_id,
                    occurred_at: now,
                },
                LedgerEvent::ObligationStatusChanged {
                    obligation_id,
                    tenant_id,
                    subject_id,
                    period_id,
                    from: previous,
                    to: updated.status(),
                    occurred_at: now,
                },
            ];

            (updated, events)
        };

        self.publish(tenant_id, events);
        info!(tenant = %tenant_id, obligation = %obligation_id, "appeal cleared");
        Ok(obligation)
    }

    // ────────────────────────────────────────────────────────────────────
    // Derived-state maintenance and reads
    // ────────────────────────────────────────────────────────────────────

    /// Recompute one obligation's derived status.
    ///
    /// Idempotent; safe to invoke redundantly. Internal mutations already
    /// trigger it; this entry point exists for reconciliation.
    pub fn recompute_obligation_status(
        &self,
        obligation_id: ObligationId,
    ) -> Result<ObligationStatus, EngineError> {
        let now = Utc::now();
        let (status, event, tenant_id) = {
            let mut state = self.write_state()?;
            let event = state.recompute(obligation_id, now)?;
            let obligation = state
                .obligations
                .get(&obligation_id)
                .ok_or(LedgerError::UnknownObligation(obligation_id))?;
            (obligation.status(), event, obligation.tenant_id())
        };
        if let Some(event) = event {
            self.publish(tenant_id, vec![event]);
        }
        Ok(status)
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<Payment> {
        self.read_state()
            .ok()
            .and_then(|s| s.payments.get(&payment_id).cloned())
    }

    pub fn obligation(&self, obligation_id: ObligationId) -> Option<Obligation> {
        self.read_state()
            .ok()
            .and_then(|s| s.obligations.get(&obligation_id).cloned())
    }

    pub fn waiver(&self, waiver_id: WaiverId) -> Option<Waiver> {
        self.read_state()
            .ok()
            .and_then(|s| s.waivers.get(&waiver_id).cloned())
    }

    /// Verified allocation total for an obligation (its settled amount).
    pub fn verified_total(&self, obligation_id: ObligationId) -> i64 {
        self.read_state()
            .map(|s| s.verified_total(obligation_id))
            .unwrap_or(0)
    }

    // ────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────

    fn authorize(
        &self,
        actor: &Principal,
        resource: &ResourceDescriptor,
        op: Operation,
    ) -> Result<(), EngineError> {
        let ctx = resource
            .tenant_id
            .and_then(|tenant_id| self.tenants.tier_of(tenant_id))
            .map(EvaluationContext::with_tier)
            .unwrap_or_default();
        evaluate(&self.policies, actor, resource, op, &ctx)?;
        Ok(())
    }

    fn ensure_active(&self, tenant_id: TenantId) -> Result<(), EngineError> {
        let org = self
            .tenants
            .organization(tenant_id)
            .ok_or(EngineError::UnknownTenant)?;
        if !org.can_transact() {
            return Err(EngineError::TenantNotActive);
        }
        Ok(())
    }

    fn payment_scope(&self, payment_id: PaymentId) -> Result<(TenantId, SubjectId), EngineError> {
        let state = self.read_state()?;
        let payment = state
            .payments
            .get(&payment_id)
            .ok_or(LedgerError::UnknownPayment(payment_id))?;
        Ok((payment.tenant_id(), payment.subject_id()))
    }

    fn obligation_scope(
        &self,
        obligation_id: ObligationId,
    ) -> Result<(TenantId, SubjectId, PeriodId), EngineError> {
        let state = self.read_state()?;
        let obligation = state
            .obligations
            .get(&obligation_id)
            .ok_or(LedgerError::UnknownObligation(obligation_id))?;
        Ok((
            obligation.tenant_id(),
            obligation.subject_id(),
            obligation.period_id(),
        ))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, LedgerState>, EngineError> {
        self.state
            .read()
            .map_err(|_| EngineError::Consistency("ledger lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, EngineError> {
        self.state
            .write()
            .map_err(|_| EngineError::Consistency("ledger lock poisoned".to_string()))
    }

    /// Post-commit hook: publish outside the lock; the committed state is
    /// the source of truth, so publication failures are logged, not fatal.
    fn publish(&self, tenant_id: TenantId, events: Vec<LedgerEvent>) {
        for event in events {
            let (entity_id, entity_kind) = entity_of(&event);
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                tenant_id,
                entity_id,
                entity_kind,
                sequence,
                event,
            );
            if let Err(err) = self.bus.publish(envelope) {
                warn!(error = ?err, "post-commit event publication failed");
            }
        }
    }

    /// Fire-and-forget notification enqueue; delivery is owned by the
    /// notification worker.
    fn notify(
        &self,
        tenant_id: TenantId,
        subject: SubjectId,
        notification_type: NotificationType,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) {
        let message = NotificationMessage::new(
            tenant_id,
            RecipientRef::new(subject.to_string()),
            notification_type,
            payload,
            now,
        );
        if let Err(err) = self.notifications.enqueue(message) {
            warn!(error = %err, "notification enqueue failed");
        }
    }
}

impl<A, B, T> crate::clearance_engine::ObligationSource for LedgerEngine<A, B, T>
where
    A: AuditSink,
    B: EventBus<EventEnvelope<LedgerEvent>>,
    T: TenantLookup,
{
    fn obligations_for(
        &self,
        tenant_id: TenantId,
        student: SubjectId,
        period_id: PeriodId,
    ) -> Vec<Obligation> {
        self.read_state()
            .map(|state| {
                state
                    .obligations
                    .values()
                    .filter(|o| {
                        o.tenant_id() == tenant_id
                            && o.subject_id() == student
                            && o.period_id() == period_id
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn snapshot<S: Serialize>(value: &S) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

fn entity_of(event: &LedgerEvent) -> (AggregateId, &'static str) {
    match event {
        LedgerEvent::FeeAssigned { obligation_id, .. }
        | LedgerEvent::FineImposed { obligation_id, .. }
        | LedgerEvent::ObligationStatusChanged { obligation_id, .. }
        | LedgerEvent::ObligationAppealed { obligation_id, .. }
        | LedgerEvent::AppealCleared { obligation_id, .. } => (obligation_id.0, "obligation"),
        LedgerEvent::PaymentRecorded { payment_id, .. }
        | LedgerEvent::PaymentAllocated { payment_id, .. }
        | LedgerEvent::PaymentVerified { payment_id, .. }
        | LedgerEvent::PaymentRejected { payment_id, .. } => (payment_id.0, "payment"),
        LedgerEvent::WaiverGranted { waiver_id, .. }
        | LedgerEvent::WaiverRejected { waiver_id, .. } => (waiver_id.0, "waiver"),
    }
}
