//! `bursar-infra` — composition layer.
//!
//! Composes the pure domain crates into running machinery: the transactional
//! ledger engine, the clearance recomputation worker, the notification queue,
//! and the receipt blob-store boundary. Every write-path operation here runs
//! as one serialized transaction: authorize, validate, write the audit entry,
//! apply, then publish events outside the lock.

pub mod clearance_engine;
pub mod ledger_engine;
pub mod notifications;
pub mod receipts;
pub mod worker;

mod integration_tests;

pub use clearance_engine::{ClearanceEngine, ObligationSource, spawn_clearance_worker};
pub use ledger_engine::{EngineError, LedgerEngine};
pub use notifications::{
    NotificationError, NotificationMessage, NotificationQueue, NotificationSender,
    NotificationType, NotificationWorker, RecipientRef, RetryPolicy,
};
pub use receipts::{
    InMemoryReceiptStore, MAX_READ_TTL, MAX_WRITE_TTL, ReceiptStore, ReceiptStoreError, SignedUrl,
    receipt_path,
};
pub use worker::{EventWorker, WorkerHandle};
