//! `bursar-events` — domain event plumbing.
//!
//! Ledger mutations publish events after their transaction commits; the
//! clearance recomputation worker and the notification pipeline consume them.
//! This crate holds only the mechanics: the event contract, the tenant-scoped
//! envelope, and the pub/sub abstraction with an in-memory implementation.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
