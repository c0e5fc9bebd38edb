//! Ledger domain events.
//!
//! Published by the ledger engine after each transaction commits; the
//! clearance recomputation worker and the notification pipeline subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{PeriodId, SubjectId, TenantId};
use bursar_events::Event;

use crate::obligation::{ObligationId, ObligationStatus};
use crate::payment::PaymentId;
use crate::waiver::{AppealId, WaiverId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    FeeAssigned {
        obligation_id: ObligationId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        period_id: PeriodId,
        amount: i64,
        occurred_at: DateTime<Utc>,
    },
    FineImposed {
        obligation_id: ObligationId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        period_id: PeriodId,
        amount: i64,
        occurred_at: DateTime<Utc>,
    },
    PaymentRecorded {
        payment_id: PaymentId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        amount: i64,
        occurred_at: DateTime<Utc>,
    },
    PaymentAllocated {
        payment_id: PaymentId,
        tenant_id: TenantId,
        obligation_ids: Vec<ObligationId>,
        occurred_at: DateTime<Utc>,
    },
    PaymentVerified {
        payment_id: PaymentId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        occurred_at: DateTime<Utc>,
    },
    PaymentRejected {
        payment_id: PaymentId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    /// Emitted whenever recomputation (or an override transition) changes an
    /// obligation's stored status. Carries the clearance scope so consumers
    /// can recompute without a second lookup.
    ObligationStatusChanged {
        obligation_id: ObligationId,
        tenant_id: TenantId,
        subject_id: SubjectId,
        period_id: PeriodId,
        from: ObligationStatus,
        to: ObligationStatus,
        occurred_at: DateTime<Utc>,
    },
    WaiverGranted {
        waiver_id: WaiverId,
        obligation_id: ObligationId,
        tenant_id: TenantId,
        origin_appeal_id: Option<AppealId>,
        occurred_at: DateTime<Utc>,
    },
    WaiverRejected {
        waiver_id: WaiverId,
        obligation_id: ObligationId,
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    ObligationAppealed {
        obligation_id: ObligationId,
        tenant_id: TenantId,
        appeal_id: AppealId,
        occurred_at: DateTime<Utc>,
    },
    AppealCleared {
        obligation_id: ObligationId,
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::FeeAssigned { .. } => "ledger.obligation.fee_assigned",
            LedgerEvent::FineImposed { .. } => "ledger.obligation.fine_imposed",
            LedgerEvent::PaymentRecorded { .. } => "ledger.payment.recorded",
            LedgerEvent::PaymentAllocated { .. } => "ledger.payment.allocated",
            LedgerEvent::PaymentVerified { .. } => "ledger.payment.verified",
            LedgerEvent::PaymentRejected { .. } => "ledger.payment.rejected",
            LedgerEvent::ObligationStatusChanged { .. } => "ledger.obligation.status_changed",
            LedgerEvent::WaiverGranted { .. } => "ledger.waiver.granted",
            LedgerEvent::WaiverRejected { .. } => "ledger.waiver.rejected",
            LedgerEvent::ObligationAppealed { .. } => "ledger.obligation.appealed",
            LedgerEvent::AppealCleared { .. } => "ledger.obligation.appeal_cleared",
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::FeeAssigned { occurred_at, .. }
            | LedgerEvent::FineImposed { occurred_at, .. }
            | LedgerEvent::PaymentRecorded { occurred_at, .. }
            | LedgerEvent::PaymentAllocated { occurred_at, .. }
            | LedgerEvent::PaymentVerified { occurred_at, .. }
            | LedgerEvent::PaymentRejected { occurred_at, .. }
            | LedgerEvent::ObligationStatusChanged { occurred_at, .. }
            | LedgerEvent::WaiverGranted { occurred_at, .. }
            | LedgerEvent::WaiverRejected { occurred_at, .. }
            | LedgerEvent::ObligationAppealed { occurred_at, .. }
            | LedgerEvent::AppealCleared { occurred_at, .. } => *occurred_at,
        }
    }
}
