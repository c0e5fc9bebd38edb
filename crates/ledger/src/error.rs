//! Ledger validation errors.
//!
//! These are deterministic, caller-correctable failures: they carry enough
//! detail for an officer-facing surface to show what to fix (unlike
//! authorization denials, which stay uniform). None of them are retried at
//! this layer; the caller decides whether to resubmit with corrected input.

use thiserror::Error;

use crate::obligation::ObligationId;
use crate::payment::{PaymentId, PaymentMethod, PaymentStatus};
use crate::waiver::WaiverId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// An allocation target exceeds the obligation's remaining balance.
    #[error(
        "allocation of {requested} exceeds remaining balance {remaining} on obligation {obligation_id}"
    )]
    OverAllocation {
        obligation_id: ObligationId,
        requested: i64,
        remaining: i64,
    },

    /// Full allocation was asserted but the targets do not sum to the
    /// payment amount.
    #[error("allocated total {allocated} does not match payment amount {payment_amount}")]
    AllocationMismatch { payment_amount: i64, allocated: i64 },

    /// The payment already left `pending`; decisions are one-shot.
    #[error("payment {payment_id} was already decided ({status})")]
    AlreadyDecided {
        payment_id: PaymentId,
        status: PaymentStatus,
    },

    /// The payment method requires an uploaded proof of payment.
    #[error("payment method {method} requires a receipt reference")]
    ProofRequired { method: PaymentMethod },

    /// Amounts must be strictly positive.
    #[error("amount must be positive")]
    InvalidAmount,

    /// The waiver is not in a state the requested transition applies to.
    #[error("waiver {waiver_id} is not active")]
    WaiverNotActive { waiver_id: WaiverId },

    /// The obligation is not under the expected sticky override.
    #[error("obligation {obligation_id} has no active override")]
    NoActiveOverride { obligation_id: ObligationId },

    #[error("unknown payment {0}")]
    UnknownPayment(PaymentId),

    #[error("unknown obligation {0}")]
    UnknownObligation(ObligationId),

    #[error("unknown waiver {0}")]
    UnknownWaiver(WaiverId),
}
