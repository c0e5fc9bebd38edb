//! `bursar-clearance` — per-period clearance derivation.
//!
//! Pure functions over ledger state: which obligations block a student's
//! clearance, and what the clearance status is. Computed on demand from
//! current obligations, never stored as a drifting snapshot. The worker that
//! recomputes on ledger events lives in `bursar-infra`.

pub mod record;

pub use record::{BlockingItems, ClearanceRecord, ClearanceStatus, blocking_items, compute_status};
