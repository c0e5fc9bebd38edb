use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{AggregateId, DomainError, DomainResult, Entity, PeriodId, SubjectId, TenantId};

use crate::error::LedgerError;

/// Obligation identifier (tenant-scoped via the owning obligation's fields).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObligationId(pub AggregateId);

impl ObligationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ObligationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What a student owes: a fee assignment or a fine.
///
/// An allocation row references exactly one obligation; whether that is a fee
/// or a fine is carried by this tag, so "exactly one of fee/fine" holds by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObligationKind {
    Fee {
        fee_type: String,
        /// Only flagged fee types block clearance; fines always do.
        required_for_clearance: bool,
    },
    Fine {
        reason: String,
    },
}

impl ObligationKind {
    pub fn is_fee(&self) -> bool {
        matches!(self, ObligationKind::Fee { .. })
    }

    pub fn is_fine(&self) -> bool {
        matches!(self, ObligationKind::Fine { .. })
    }
}

/// Status derived purely from verified allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

/// Sticky statuses set only by the waiver/appeal workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStatus {
    Waived,
    Appealed,
}

/// Obligation status: either derived from the allocation sum, or a sticky
/// override.
///
/// Recomputation can only ever produce the `Derived` variant; entering or
/// leaving `Override` is an explicit, separately-authorized action. Keeping
/// the two as distinct variants makes the sticky rule structural rather than
/// a convention over a flat status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum ObligationStatus {
    Derived(DerivedStatus),
    Override(OverrideStatus),
}

impl ObligationStatus {
    pub fn is_sticky(&self) -> bool {
        matches!(self, ObligationStatus::Override(_))
    }

    /// Settled obligations stop blocking clearance: fully paid or waived.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ObligationStatus::Derived(DerivedStatus::Paid)
                | ObligationStatus::Override(OverrideStatus::Waived)
        )
    }
}

impl core::fmt::Display for ObligationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            ObligationStatus::Derived(DerivedStatus::Pending) => "pending",
            ObligationStatus::Derived(DerivedStatus::PartiallyPaid) => "partially_paid",
            ObligationStatus::Derived(DerivedStatus::Paid) => "paid",
            ObligationStatus::Override(OverrideStatus::Waived) => "waived",
            ObligationStatus::Override(OverrideStatus::Appealed) => "appealed",
        };
        f.write_str(label)
    }
}

/// Derive an obligation's status from its verified allocation total.
///
/// Pure and idempotent: same inputs, same status, no matter how often it
/// runs. Sticky overrides are handled by the caller, never here.
pub fn derive_status(amount: i64, total_verified: i64) -> DerivedStatus {
    if total_verified <= 0 {
        DerivedStatus::Pending
    } else if total_verified < amount {
        DerivedStatus::PartiallyPaid
    } else {
        DerivedStatus::Paid
    }
}

/// A financial obligation owed by one student within one clearance period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    id: ObligationId,
    subject_id: SubjectId,
    tenant_id: TenantId,
    period_id: PeriodId,
    kind: ObligationKind,
    /// Amount owed in centavos.
    amount: i64,
    status: ObligationStatus,
    created_at: DateTime<Utc>,
}

impl Obligation {
    pub fn new(
        id: ObligationId,
        subject_id: SubjectId,
        tenant_id: TenantId,
        period_id: PeriodId,
        kind: ObligationKind,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if amount <= 0 {
            return Err(DomainError::validation("obligation amount must be positive"));
        }
        Ok(Self {
            id,
            subject_id,
            tenant_id,
            period_id,
            kind,
            amount,
            status: ObligationStatus::Derived(DerivedStatus::Pending),
            created_at,
        })
    }

    pub fn id_typed(&self) -> ObligationId {
        self.id
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn period_id(&self) -> PeriodId {
        self.period_id
    }

    pub fn kind(&self) -> &ObligationKind {
        &self.kind
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn status(&self) -> ObligationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Remaining balance given the current verified allocation total.
    pub fn remaining(&self, total_verified: i64) -> i64 {
        (self.amount - total_verified).max(0)
    }

    /// Apply recomputed derived status.
    ///
    /// No-op while a sticky override is in place. Returns the previous status
    /// when the stored status actually changed.
    pub fn apply_derived(&mut self, derived: DerivedStatus) -> Option<ObligationStatus> {
        if self.status.is_sticky() {
            return None;
        }
        let next = ObligationStatus::Derived(derived);
        if self.status == next {
            return None;
        }
        let previous = self.status;
        self.status = next;
        Some(previous)
    }

    /// Enter a sticky override (waived/appealed).
    pub fn set_override(&mut self, value: OverrideStatus) -> ObligationStatus {
        let previous = self.status;
        self.status = ObligationStatus::Override(value);
        previous
    }

    /// Leave a sticky override, restoring payment-derived truth.
    ///
    /// This is the one path that "unsticks" a sticky status; the caller
    /// supplies the freshly derived status computed from verified
    /// allocations.
    pub fn clear_override(&mut self, derived: DerivedStatus) -> Result<(), LedgerError> {
        if !self.status.is_sticky() {
            return Err(LedgerError::NoActiveOverride {
                obligation_id: self.id,
            });
        }
        self.status = ObligationStatus::Derived(derived);
        Ok(())
    }
}

impl Entity for Obligation {
    type Id = ObligationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
