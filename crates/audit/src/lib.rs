//! `bursar-audit` — append-only audit recording.
//!
//! Every ledger mutation and every privileged cross-tenant read produces
//! exactly one audit entry, written inside the transaction it documents. The
//! sink contract is **structurally** append-only: the trait exposes no update
//! or delete operation at all, not merely a policy forbidding them.

pub mod entry;
pub mod sink;

pub use entry::{AuditAction, AuditEntry, AuditEntryId};
pub use sink::{AuditError, AuditSink, FailingAuditSink, InMemoryAuditLog};
