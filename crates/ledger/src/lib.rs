//! `bursar-ledger` — financial obligation domain model.
//!
//! Pure domain logic only: obligations (fees and fines), payments,
//! allocations, waivers, and the status-derivation rules that keep them
//! consistent. No IO, no locking, no persistence concerns; the transactional
//! write path lives in `bursar-infra`.
//!
//! Amounts are `i64` in the smallest currency unit (centavos).

pub mod allocation;
pub mod error;
pub mod event;
pub mod obligation;
pub mod payment;
pub mod waiver;

pub use allocation::{Allocation, AllocationId, AllocationTarget};
pub use error::LedgerError;
pub use event::LedgerEvent;
pub use obligation::{
    DerivedStatus, Obligation, ObligationId, ObligationKind, ObligationStatus, OverrideStatus,
    derive_status,
};
pub use payment::{Payment, PaymentId, PaymentMethod, PaymentStatus, ReceiptRef};
pub use waiver::{AppealId, Waiver, WaiverId, WaiverStatus};
