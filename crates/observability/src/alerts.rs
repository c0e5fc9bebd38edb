//! Alert hooks.
//!
//! Consistency violations (invariant breaks detected at commit time) are
//! defect signals: they must reach an operator channel, not just a log line.
//! The hook is a seam so deployments can wire a pager/webhook; the default
//! raises a structured error event.

use tracing::error;

/// Destination for defect-signal alerts.
pub trait AlertHook: Send + Sync {
    fn raise(&self, component: &str, message: &str);
}

/// Default hook: emits a structured `tracing` error flagged as an alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertHook;

impl AlertHook for TracingAlertHook {
    fn raise(&self, component: &str, message: &str) {
        error!(alert = true, component, message, "consistency alert raised");
    }
}
