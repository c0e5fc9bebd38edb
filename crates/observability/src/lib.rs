//! Tracing, logging, alerting (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Alert hooks for defect-signal errors.
pub mod alerts;

pub use alerts::{AlertHook, TracingAlertHook};
