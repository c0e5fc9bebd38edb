//! Integration tests for the full pipeline.
//!
//! Tests: authorize → ledger transaction → audit → post-commit events →
//! clearance recomputation worker → notifications.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;

    use bursar_audit::{AuditAction, FailingAuditSink, InMemoryAuditLog};
    use bursar_auth::{
        EvaluationContext, Operation, PolicySet, Principal, PrivilegedReadError,
        ResourceDescriptor, Role, evaluate, privileged_read,
    };
    use bursar_core::{PeriodId, SubjectId, TenantId, Tier};
    use bursar_events::{EventEnvelope, InMemoryEventBus};
    use bursar_ledger::{
        AllocationTarget, DerivedStatus, LedgerEvent, ObligationStatus, PaymentMethod,
    };
    use bursar_clearance::ClearanceStatus;
    use bursar_observability::TracingAlertHook;
    use bursar_tenancy::{InviteToken, OnboardingInvite, TenantDirectory, TenantLookup};

    use crate::clearance_engine::{ClearanceEngine, spawn_clearance_worker};
    use crate::ledger_engine::LedgerEngine;
    use crate::notifications::{
        NotificationError, NotificationMessage, NotificationQueue, NotificationSender,
        NotificationType, NotificationWorker, RetryPolicy,
    };
    use crate::receipts::{InMemoryReceiptStore, ReceiptStore, receipt_path};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>;
    type Engine = LedgerEngine<Arc<InMemoryAuditLog>, Bus, Arc<TenantDirectory>>;

    struct Pipeline {
        engine: Arc<Engine>,
        clearance: Arc<ClearanceEngine<Arc<InMemoryAuditLog>, Arc<Engine>>>,
        audit: Arc<InMemoryAuditLog>,
        directory: Arc<TenantDirectory>,
        tenant: TenantId,
        admin: Principal,
        manager: Principal,
        student: SubjectId,
        period: PeriodId,
        worker: Option<crate::worker::WorkerHandle>,
        notification_worker: Option<crate::worker::WorkerHandle>,
        delivered: Arc<Mutex<Vec<NotificationMessage>>>,
    }

    impl Drop for Pipeline {
        fn drop(&mut self) {
            if let Some(worker) = self.worker.take() {
                worker.shutdown();
            }
            if let Some(worker) = self.notification_worker.take() {
                worker.shutdown();
            }
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSender {
        delivered: Arc<Mutex<Vec<NotificationMessage>>>,
    }

    impl NotificationSender for CollectingSender {
        fn send(&mut self, message: &NotificationMessage) -> Result<(), NotificationError> {
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn setup() -> Pipeline {
        let audit = Arc::new(InMemoryAuditLog::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let directory = Arc::new(TenantDirectory::new());

        let token = InviteToken::new("pipeline-invite");
        directory
            .register_invite(OnboardingInvite::new(
                token.clone(),
                "Mabini Integrated School",
                "registrar@mis.edu.ph",
                Tier::Premium,
            ))
            .unwrap();
        let tenant = directory.create_from_invite(&token).unwrap().id_typed();

        let (queue, receiver) = NotificationQueue::channel();
        let sender = CollectingSender::default();
        let delivered = sender.delivered.clone();
        let notification_worker = NotificationWorker::spawn(
            "notify-pipeline",
            receiver,
            sender,
            RetryPolicy::default(),
        );

        let engine = Arc::new(LedgerEngine::new(
            PolicySet::standard(),
            audit.clone(),
            bus.clone(),
            directory.clone(),
            queue,
            Arc::new(TracingAlertHook),
        ));

        let clearance = Arc::new(ClearanceEngine::new(
            PolicySet::standard(),
            audit.clone(),
            engine.clone(),
        ));
        // Subscribe before any events are published.
        let worker = spawn_clearance_worker(clearance.clone(), bus);

        let student = SubjectId::new();
        directory.enroll_student(tenant, student).unwrap();

        Pipeline {
            engine,
            clearance,
            audit,
            directory,
            tenant,
            admin: Principal::officer(SubjectId::new(), tenant, Role::OrgAdmin),
            manager: Principal::officer(SubjectId::new(), tenant, Role::OrgManager),
            student,
            period: PeriodId::new(),
            worker: Some(worker),
            notification_worker: Some(notification_worker),
            delivered,
        }
    }

    /// The clearance worker processes events asynchronously.
    fn wait_for_processing() {
        std::thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn settling_every_blocking_obligation_clears_the_student() {
        let p = setup();

        let fee = p
            .engine
            .assign_fee(&p.manager, p.tenant, p.student, p.period, "tuition", true, 20_000)
            .unwrap();
        let fine = p
            .engine
            .impose_fine(&p.manager, p.tenant, p.student, p.period, "overdue book", 500)
            .unwrap();

        p.clearance.recompute(p.tenant, p.student, p.period).unwrap();
        assert_eq!(
            p.clearance.status(p.tenant, p.student, p.period),
            Some(ClearanceStatus::NotCleared)
        );

        // Pay the fee in full.
        let payment = p
            .engine
            .record_payment(&p.manager, p.tenant, p.student, 20_000, PaymentMethod::Cash, None)
            .unwrap();
        p.engine
            .allocate(
                &p.manager,
                payment.id_typed(),
                &[AllocationTarget { obligation_id: fee.id_typed(), amount: 20_000 }],
                true,
            )
            .unwrap();
        p.engine.verify_payment(&p.manager, payment.id_typed()).unwrap();

        wait_for_processing();
        // Fine still blocks.
        assert_eq!(
            p.clearance.status(p.tenant, p.student, p.period),
            Some(ClearanceStatus::NotCleared)
        );

        // Waive the fine; the worker recomputes to cleared.
        p.engine
            .grant_waiver(&p.admin, fine.id_typed(), "first offense", None)
            .unwrap();
        wait_for_processing();
        assert_eq!(
            p.clearance.status(p.tenant, p.student, p.period),
            Some(ClearanceStatus::Cleared)
        );
    }

    #[test]
    fn optional_fees_never_block_clearance() {
        let p = setup();

        p.engine
            .assign_fee(&p.manager, p.tenant, p.student, p.period, "yearbook", false, 35_000)
            .unwrap();

        let status = p.clearance.recompute(p.tenant, p.student, p.period).unwrap();
        assert_eq!(status, ClearanceStatus::Cleared);
    }

    #[test]
    fn clearance_override_is_sticky_and_audited() {
        let p = setup();

        p.engine
            .impose_fine(&p.manager, p.tenant, p.student, p.period, "damaged chair", 2_500)
            .unwrap();
        p.clearance.recompute(p.tenant, p.student, p.period).unwrap();

        let record = p
            .clearance
            .override_clearance(&p.admin, p.tenant, p.student, p.period, "approved by principal")
            .unwrap();
        assert_eq!(record.status, ClearanceStatus::Overridden);

        // Ledger churn must not revert the override.
        let payment = p
            .engine
            .record_payment(&p.manager, p.tenant, p.student, 2_500, PaymentMethod::Cash, None)
            .unwrap();
        p.engine.verify_payment(&p.manager, payment.id_typed()).unwrap();
        wait_for_processing();
        assert_eq!(
            p.clearance.status(p.tenant, p.student, p.period),
            Some(ClearanceStatus::Overridden)
        );

        let overrides = p
            .audit
            .entries()
            .into_iter()
            .filter(|e| e.action == AuditAction::Overridden && e.entity_kind == "clearance")
            .count();
        assert_eq!(overrides, 1);

        // Explicitly clearing the override returns to recomputed truth:
        // the unpaid fine blocks again.
        let record = p
            .clearance
            .clear_override(&p.admin, p.tenant, p.student, p.period)
            .unwrap();
        assert_eq!(record.status, ClearanceStatus::NotCleared);
    }

    #[test]
    fn payment_decisions_notify_the_student() {
        let p = setup();

        let fee = p
            .engine
            .assign_fee(&p.manager, p.tenant, p.student, p.period, "tuition", true, 10_000)
            .unwrap();
        let payment = p
            .engine
            .record_payment(&p.manager, p.tenant, p.student, 10_000, PaymentMethod::Cash, None)
            .unwrap();
        p.engine
            .allocate(
                &p.manager,
                payment.id_typed(),
                &[AllocationTarget { obligation_id: fee.id_typed(), amount: 10_000 }],
                true,
            )
            .unwrap();
        p.engine.verify_payment(&p.manager, payment.id_typed()).unwrap();

        wait_for_processing();
        let delivered = p.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].notification_type, NotificationType::PaymentVerified);
        assert_eq!(delivered[0].recipient.as_str(), p.student.to_string());
    }

    #[test]
    fn privileged_read_is_audited_or_fails_closed() {
        let p = setup();
        let platform_admin = Principal::platform_admin(SubjectId::new());
        let record = ResourceDescriptor::student_record(p.tenant, p.student);

        // Plain evaluation cannot reach PII cross-tenant.
        assert!(
            evaluate(
                &PolicySet::standard(),
                &platform_admin,
                &record,
                Operation::Read,
                &EvaluationContext::default(),
            )
            .is_err()
        );

        // With a justification, the read is granted and leaves exactly one
        // privileged-read entry.
        privileged_read(
            &PolicySet::standard(),
            &platform_admin,
            &record,
            &p.student.to_string(),
            "support ticket #1",
            p.audit.as_ref(),
            Utc::now(),
        )
        .unwrap();
        let privileged = p
            .audit
            .entries()
            .into_iter()
            .filter(|e| e.action == AuditAction::PrivilegedRead)
            .count();
        assert_eq!(privileged, 1);

        // A failing audit sink fails the read closed.
        let err = privileged_read(
            &PolicySet::standard(),
            &platform_admin,
            &record,
            &p.student.to_string(),
            "support ticket #2",
            &FailingAuditSink,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PrivilegedReadError::AuditUnavailable(_)));
    }

    #[test]
    fn receipt_backed_payment_round_trip() {
        let p = setup();
        let store = InMemoryReceiptStore::new();

        let fee = p
            .engine
            .assign_fee(&p.manager, p.tenant, p.student, p.period, "tuition", true, 50_000)
            .unwrap();

        // The student uploads a receipt to a deterministic path, then
        // records the payment referencing it.
        let student_principal = Principal::student(p.student, p.tenant);
        let payment = p
            .engine
            .record_payment(
                &student_principal,
                p.tenant,
                p.student,
                50_000,
                PaymentMethod::GcashReceipt,
                Some(receipt_path(
                    p.tenant,
                    bursar_ledger::PaymentId::new(bursar_core::AggregateId::new()),
                    "jpg",
                )),
            )
            .unwrap();
        let upload = store
            .signed_upload_url(payment.proof_ref().unwrap(), Duration::from_secs(600))
            .unwrap();
        assert!(upload.url.contains(p.tenant.to_string().as_str()));

        p.engine
            .allocate(
                &p.manager,
                payment.id_typed(),
                &[AllocationTarget { obligation_id: fee.id_typed(), amount: 50_000 }],
                true,
            )
            .unwrap();
        p.engine.verify_payment(&p.manager, payment.id_typed()).unwrap();
        assert_eq!(
            p.engine.obligation(fee.id_typed()).unwrap().status(),
            ObligationStatus::Derived(DerivedStatus::Paid)
        );
    }

    #[test]
    fn appeal_blocks_then_clears_back_to_derived_truth() {
        let p = setup();

        let fine = p
            .engine
            .impose_fine(&p.manager, p.tenant, p.student, p.period, "lost key", 1_500)
            .unwrap();
        let appeal_id = bursar_ledger::AppealId::new(bursar_core::AggregateId::new());
        p.engine
            .mark_appealed(&p.manager, fine.id_typed(), appeal_id)
            .unwrap();

        // Appealed obligations still block clearance.
        let status = p.clearance.recompute(p.tenant, p.student, p.period).unwrap();
        assert_eq!(status, ClearanceStatus::NotCleared);

        // Clearing the appeal without a waiver restores derived pending.
        p.engine.clear_appeal(&p.manager, fine.id_typed()).unwrap();
        assert_eq!(
            p.engine.obligation(fine.id_typed()).unwrap().status(),
            ObligationStatus::Derived(DerivedStatus::Pending)
        );
    }

    #[test]
    fn student_count_tracks_membership_in_the_directory() {
        let p = setup();
        let before = p
            .directory
            .organization(p.tenant)
            .unwrap()
            .student_count();

        let extra = SubjectId::new();
        p.directory.enroll_student(p.tenant, extra).unwrap();
        p.directory.withdraw_student(p.tenant, extra).unwrap();

        assert_eq!(
            p.directory.organization(p.tenant).unwrap().student_count(),
            before
        );
    }
}
