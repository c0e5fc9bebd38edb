use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{AggregateId, Entity, SubjectId, TenantId};

use crate::error::LedgerError;

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How a payment was made. Receipt-backed methods require an uploaded proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Over-the-counter cash, recorded by an officer.
    Cash,
    BankTransfer,
    GcashReceipt,
}

impl PaymentMethod {
    pub fn requires_proof(&self) -> bool {
        matches!(self, PaymentMethod::BankTransfer | PaymentMethod::GcashReceipt)
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::GcashReceipt => "gcash_receipt",
        };
        f.write_str(label)
    }
}

/// Deterministic blob-store path for an uploaded receipt image.
///
/// Only the path is ever persisted; signed URLs are requested on demand and
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptRef(String);

impl ReceiptRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Payment lifecycle. Only `Verified` payments count toward allocation sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Rejected,
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// A payment submitted by (or on behalf of) a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    subject_id: SubjectId,
    tenant_id: TenantId,
    /// Amount in centavos.
    amount: i64,
    method: PaymentMethod,
    proof_ref: Option<ReceiptRef>,
    status: PaymentStatus,
    decided_by: Option<SubjectId>,
    decided_at: Option<DateTime<Utc>>,
    reject_reason: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        id: PaymentId,
        subject_id: SubjectId,
        tenant_id: TenantId,
        amount: i64,
        method: PaymentMethod,
        proof_ref: Option<ReceiptRef>,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if method.requires_proof() && proof_ref.is_none() {
            return Err(LedgerError::ProofRequired { method });
        }
        Ok(Self {
            id,
            subject_id,
            tenant_id,
            amount,
            method,
            proof_ref,
            status: PaymentStatus::Pending,
            decided_by: None,
            decided_at: None,
            reject_reason: None,
            recorded_at,
        })
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn proof_ref(&self) -> Option<&ReceiptRef> {
        self.proof_ref.as_ref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn decided_by(&self) -> Option<SubjectId> {
        self.decided_by
    }

    pub fn reject_reason(&self) -> Option<&str> {
        self.reject_reason.as_deref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_verified(&self) -> bool {
        self.status == PaymentStatus::Verified
    }

    /// Mark verified. One-shot: anything but `Pending` fails.
    pub fn verify(
        &mut self,
        verifier: SubjectId,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status != PaymentStatus::Pending {
            return Err(LedgerError::AlreadyDecided {
                payment_id: self.id,
                status: self.status,
            });
        }
        self.status = PaymentStatus::Verified;
        self.decided_by = Some(verifier);
        self.decided_at = Some(at);
        Ok(())
    }

    /// Mark rejected.
    ///
    /// Rejection doubles as the reversal path for an erroneously verified
    /// payment, so both `Pending` and `Verified` transition here. Idempotent
    /// against replay: rejecting an already-rejected payment is a no-op
    /// (`Ok(false)`), tolerating at-least-once delivery of retried requests.
    pub fn reject(
        &mut self,
        officer: SubjectId,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        match self.status {
            PaymentStatus::Rejected => Ok(false),
            PaymentStatus::Pending | PaymentStatus::Verified => {
                self.status = PaymentStatus::Rejected;
                self.decided_by = Some(officer);
                self.decided_at = Some(at);
                self.reject_reason = Some(reason.into());
                Ok(true)
            }
        }
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(method: PaymentMethod, proof: Option<ReceiptRef>) -> Result<Payment, LedgerError> {
        Payment::new(
            PaymentId::new(AggregateId::new()),
            SubjectId::new(),
            TenantId::new(),
            20_000,
            method,
            proof,
            Utc::now(),
        )
    }

    #[test]
    fn receipt_backed_methods_require_proof() {
        assert!(matches!(
            pending(PaymentMethod::GcashReceipt, None),
            Err(LedgerError::ProofRequired { .. })
        ));
        assert!(pending(
            PaymentMethod::GcashReceipt,
            Some(ReceiptRef::new("t-1/p-1.jpg"))
        )
        .is_ok());
        assert!(pending(PaymentMethod::Cash, None).is_ok());
    }

    #[test]
    fn verify_is_one_shot() {
        let mut payment = pending(PaymentMethod::Cash, None).unwrap();
        payment.verify(SubjectId::new(), Utc::now()).unwrap();
        let err = payment.verify(SubjectId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyDecided { .. }));
    }

    #[test]
    fn reject_is_idempotent_and_reverses_verification() {
        let mut payment = pending(PaymentMethod::Cash, None).unwrap();
        assert!(payment.reject(SubjectId::new(), "duplicate", Utc::now()).unwrap());
        assert!(!payment.reject(SubjectId::new(), "duplicate", Utc::now()).unwrap());

        let mut verified = pending(PaymentMethod::Cash, None).unwrap();
        verified.verify(SubjectId::new(), Utc::now()).unwrap();
        assert!(verified.reject(SubjectId::new(), "bad receipt", Utc::now()).unwrap());
        assert_eq!(verified.status(), PaymentStatus::Rejected);
    }
}
