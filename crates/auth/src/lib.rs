//! `bursar-auth` — pure authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage. It resolves
//! verified session claims into a per-request [`Principal`] and evaluates a
//! declarative policy rule set against resource descriptors. The only outward
//! seam is the audit sink required by the privileged-read pattern, which must
//! log a justification *before* any data is returned.

pub mod claims;
pub mod evaluate;
pub mod policy;
pub mod principal;
pub mod resource;

pub use claims::{SessionClaims, resolve_principal};
pub use evaluate::{
    AuthzError, DenyReason, EvaluationContext, PrivilegedGrant, PrivilegedReadError, evaluate,
    privileged_read,
};
pub use policy::{PolicyRule, PolicySet};
pub use principal::{Principal, Role};
pub use resource::{Operation, ResourceDescriptor, ResourceKind};
