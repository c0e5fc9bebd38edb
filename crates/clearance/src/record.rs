use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{DomainError, DomainResult, PeriodId, SubjectId, TenantId};
use bursar_ledger::{Obligation, ObligationId, ObligationKind};

/// Clearance status for one (student, tenant, period).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceStatus {
    /// Not yet computed.
    Pending,
    Cleared,
    NotCleared,
    /// Officer-set sticky state; recomputation never reverts it.
    Overridden,
}

/// Obligations currently blocking a student's clearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingItems {
    pub fees: Vec<ObligationId>,
    pub fines: Vec<ObligationId>,
}

impl BlockingItems {
    pub fn is_empty(&self) -> bool {
        self.fees.is_empty() && self.fines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fees.len() + self.fines.len()
    }
}

/// Which of the given obligations block clearance.
///
/// A fine blocks unless settled (paid or waived). A fee blocks under the same
/// condition *and* only when its fee type is flagged as required for
/// clearance. Appealed obligations still block: an appeal defers settlement,
/// it does not grant it.
pub fn blocking_items<'a>(obligations: impl IntoIterator<Item = &'a Obligation>) -> BlockingItems {
    let mut blocking = BlockingItems::default();
    for obligation in obligations {
        if obligation.status().is_settled() {
            continue;
        }
        match obligation.kind() {
            ObligationKind::Fine { .. } => blocking.fines.push(obligation.id_typed()),
            ObligationKind::Fee {
                required_for_clearance,
                ..
            } => {
                if *required_for_clearance {
                    blocking.fees.push(obligation.id_typed());
                }
            }
        }
    }
    blocking
}

/// Derive the clearance status from the blocking set.
///
/// The sticky `Overridden` state survives recomputation; everything else is a
/// pure function of whether anything blocks.
pub fn compute_status(current: ClearanceStatus, blocking: &BlockingItems) -> ClearanceStatus {
    if current == ClearanceStatus::Overridden {
        return ClearanceStatus::Overridden;
    }
    if blocking.is_empty() {
        ClearanceStatus::Cleared
    } else {
        ClearanceStatus::NotCleared
    }
}

/// Stored clearance state for one (student, tenant, period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceRecord {
    pub student_id: SubjectId,
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub status: ClearanceStatus,
    pub override_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClearanceRecord {
    pub fn new(
        student_id: SubjectId,
        tenant_id: TenantId,
        period_id: PeriodId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id,
            tenant_id,
            period_id,
            status: ClearanceStatus::Pending,
            override_reason: None,
            updated_at: at,
        }
    }

    /// Recompute from the blocking set. No-op while overridden.
    pub fn recompute(&mut self, blocking: &BlockingItems, at: DateTime<Utc>) {
        let next = compute_status(self.status, blocking);
        if next != self.status {
            self.status = next;
            self.updated_at = at;
        }
    }

    /// Officer-set sticky override; requires a reason.
    pub fn set_override(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("override reason must not be empty"));
        }
        self.status = ClearanceStatus::Overridden;
        self.override_reason = Some(reason);
        self.updated_at = at;
        Ok(())
    }

    /// Explicit officer action clearing the override; the caller supplies the
    /// current blocking set so the record returns to recomputed truth.
    pub fn clear_override(&mut self, blocking: &BlockingItems, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ClearanceStatus::Overridden {
            return Err(DomainError::invariant("clearance is not overridden"));
        }
        self.override_reason = None;
        self.status = if blocking.is_empty() {
            ClearanceStatus::Cleared
        } else {
            ClearanceStatus::NotCleared
        };
        self.updated_at = at;
        Ok(())
    }
}
