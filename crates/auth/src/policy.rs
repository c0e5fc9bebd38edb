//! Declarative policy rule library.
//!
//! Each rule is a data-described pattern evaluated by the single interpreter
//! in [`crate::evaluate`]. Rules for one resource kind are a union: any rule
//! may grant an operation, and adding a rule never removes a grant. Absence
//! of any matching rule is a deny: a kind registered with zero rules (or not
//! registered at all) yields no access to anyone.

use std::collections::HashMap;

use serde::Serialize;

use bursar_core::Tier;

use crate::principal::Role;
use crate::resource::{Operation, ResourceKind};

/// One declarative authorization pattern.
///
/// The variants mirror the access shapes this product needs; they are not a
/// general policy DSL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Grant iff the principal's verified tenant claim equals the resource's
    /// tenant.
    TenantScoped { ops: Vec<Operation> },

    /// Tenant-scoped, plus the principal's role must be in the allowed set.
    /// A role absent from the set silently yields no grant, not an error.
    RoleGated { ops: Vec<Operation>, roles: Vec<Role> },

    /// Tenant-scoped, plus the tenant's subscription tier must satisfy
    /// `required_tier` under `basic < plus < premium`.
    TierGated {
        ops: Vec<Operation>,
        required_tier: Tier,
    },

    /// Grant iff the principal is a student and owns the resource.
    /// Independent of tenant matching: students are scoped by ownership.
    SelfAccess { ops: Vec<Operation> },

    /// Grant to platform admins across tenants, for designated
    /// platform-level resources. Never grants on PII-flagged resources.
    PlatformCrossTenant { ops: Vec<Operation> },

    /// Platform-admin access to PII-flagged resources, available only
    /// through the distinguished privileged-read path (justification
    /// required, audited before data is returned).
    PrivilegedAudited { ops: Vec<Operation> },
}

impl PolicyRule {
    pub fn covers(&self, op: Operation) -> bool {
        let ops = match self {
            PolicyRule::TenantScoped { ops }
            | PolicyRule::RoleGated { ops, .. }
            | PolicyRule::TierGated { ops, .. }
            | PolicyRule::SelfAccess { ops }
            | PolicyRule::PlatformCrossTenant { ops }
            | PolicyRule::PrivilegedAudited { ops } => ops,
        };
        ops.contains(&op)
    }
}

/// Registry of policy rules per resource kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicySet {
    rules: HashMap<ResourceKind, Vec<PolicyRule>>,
}

impl PolicySet {
    /// An empty set: denies everything (the default-deny baseline).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ResourceKind, rule: PolicyRule) -> &mut Self {
        self.rules.entry(kind).or_default().push(rule);
        self
    }

    pub fn rules_for(&self, kind: ResourceKind) -> &[PolicyRule] {
        self.rules.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The product's standing access model.
    ///
    /// - Officers manage their own tenant's ledger entities, with decisions
    ///   (payment verification, waiver grants, clearance overrides) gated to
    ///   manager rank and above, and waiver decisions to org admins.
    /// - Students read their own records, obligations, payments and
    ///   clearance, and may submit their own payments.
    /// - Report exports are tier-gated at `plus`.
    /// - Platform admins operate on organizations, invites and the audit log
    ///   cross-tenant; student records are reachable for them only through
    ///   the privileged audited path.
    pub fn standard() -> Self {
        use Operation::{Create, Delete, Read, Update};
        use PolicyRule::{
            PlatformCrossTenant, PrivilegedAudited, RoleGated, SelfAccess, TierGated,
        };
        use Role::{OrgAdmin, OrgManager, OrgStaff};

        let mut set = Self::empty();

        set.register(
            ResourceKind::Organization,
            PlatformCrossTenant {
                ops: vec![Read, Create, Update, Delete],
            },
        )
        .register(
            ResourceKind::Organization,
            RoleGated {
                ops: vec![Read, Update],
                roles: vec![OrgAdmin],
            },
        );

        set.register(
            ResourceKind::OnboardingInvite,
            PlatformCrossTenant {
                ops: vec![Read, Create, Update],
            },
        );

        set.register(
            ResourceKind::StudentRecord,
            RoleGated {
                ops: vec![Read, Create, Update],
                roles: vec![OrgAdmin, OrgManager, OrgStaff],
            },
        )
        .register(ResourceKind::StudentRecord, SelfAccess { ops: vec![Read] })
        .register(
            ResourceKind::StudentRecord,
            PrivilegedAudited { ops: vec![Read] },
        );

        set.register(
            ResourceKind::Obligation,
            RoleGated {
                ops: vec![Read],
                roles: vec![OrgAdmin, OrgManager, OrgStaff],
            },
        )
        .register(
            ResourceKind::Obligation,
            RoleGated {
                ops: vec![Create, Update],
                roles: vec![OrgAdmin, OrgManager],
            },
        )
        .register(ResourceKind::Obligation, SelfAccess { ops: vec![Read] });

        set.register(
            ResourceKind::Payment,
            RoleGated {
                ops: vec![Read, Create],
                roles: vec![OrgAdmin, OrgManager, OrgStaff],
            },
        )
        .register(
            ResourceKind::Payment,
            RoleGated {
                ops: vec![Update],
                roles: vec![OrgAdmin, OrgManager],
            },
        )
        .register(
            ResourceKind::Payment,
            SelfAccess {
                ops: vec![Read, Create],
            },
        );

        set.register(
            ResourceKind::Waiver,
            RoleGated {
                ops: vec![Read, Create],
                roles: vec![OrgAdmin, OrgManager, OrgStaff],
            },
        )
        .register(
            ResourceKind::Waiver,
            RoleGated {
                ops: vec![Update],
                roles: vec![OrgAdmin],
            },
        )
        .register(ResourceKind::Waiver, SelfAccess { ops: vec![Read] });

        set.register(
            ResourceKind::Clearance,
            RoleGated {
                ops: vec![Read],
                roles: vec![OrgAdmin, OrgManager, OrgStaff],
            },
        )
        .register(
            ResourceKind::Clearance,
            RoleGated {
                ops: vec![Update],
                roles: vec![OrgAdmin, OrgManager],
            },
        )
        .register(ResourceKind::Clearance, SelfAccess { ops: vec![Read] });

        set.register(
            ResourceKind::ReportExport,
            TierGated {
                ops: vec![Read, Create],
                required_tier: Tier::Plus,
            },
        );

        set.register(
            ResourceKind::AuditLog,
            PlatformCrossTenant { ops: vec![Read] },
        );

        set
    }
}
