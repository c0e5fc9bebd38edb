use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{AggregateId, Entity, SubjectId, TenantId};

use crate::error::LedgerError;
use crate::obligation::ObligationId;

/// Waiver identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaiverId(pub AggregateId);

impl WaiverId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WaiverId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of the appeal a waiver may originate from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppealId(pub AggregateId);

impl AppealId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AppealId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaiverStatus {
    Pending,
    Approved,
    Rejected,
}

/// A granted (or reversed) waiver of one obligation.
///
/// Approval sets the linked obligation to its sticky `waived` override in the
/// same transaction; reversal is the one path that restores payment-derived
/// truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    id: WaiverId,
    obligation_id: ObligationId,
    tenant_id: TenantId,
    reason: String,
    status: WaiverStatus,
    decided_by: Option<SubjectId>,
    decided_at: Option<DateTime<Utc>>,
    origin_appeal_id: Option<AppealId>,
    created_at: DateTime<Utc>,
}

impl Waiver {
    /// A waiver granted directly by an approver (possibly resolving an
    /// appeal).
    pub fn approved(
        id: WaiverId,
        obligation_id: ObligationId,
        tenant_id: TenantId,
        reason: impl Into<String>,
        approver: SubjectId,
        origin_appeal_id: Option<AppealId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            obligation_id,
            tenant_id,
            reason: reason.into(),
            status: WaiverStatus::Approved,
            decided_by: Some(approver),
            decided_at: Some(at),
            origin_appeal_id,
            created_at: at,
        }
    }

    pub fn id_typed(&self) -> WaiverId {
        self.id
    }

    pub fn obligation_id(&self) -> ObligationId {
        self.obligation_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn status(&self) -> WaiverStatus {
        self.status
    }

    pub fn decided_by(&self) -> Option<SubjectId> {
        self.decided_by
    }

    pub fn origin_appeal_id(&self) -> Option<AppealId> {
        self.origin_appeal_id
    }

    /// Reverse a previously approved waiver.
    pub fn reject(&mut self, officer: SubjectId, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != WaiverStatus::Approved {
            return Err(LedgerError::WaiverNotActive { waiver_id: self.id });
        }
        self.status = WaiverStatus::Rejected;
        self.decided_by = Some(officer);
        self.decided_at = Some(at);
        Ok(())
    }
}

impl Entity for Waiver {
    type Id = WaiverId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversing_a_waiver_is_one_shot() {
        let mut waiver = Waiver::approved(
            WaiverId::new(AggregateId::new()),
            ObligationId::new(AggregateId::new()),
            TenantId::new(),
            "indigency program",
            SubjectId::new(),
            None,
            Utc::now(),
        );
        waiver.reject(SubjectId::new(), Utc::now()).unwrap();
        assert!(waiver.reject(SubjectId::new(), Utc::now()).is_err());
    }
}
