use serde::{Deserialize, Serialize};

use bursar_core::{SubjectId, TenantId, Tier};

/// Kinds of resources the policy library governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization,
    OnboardingInvite,
    StudentRecord,
    Obligation,
    Payment,
    Waiver,
    Clearance,
    ReportExport,
    AuditLog,
}

/// Operations a rule may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Organization => "organization",
            ResourceKind::OnboardingInvite => "onboarding_invite",
            ResourceKind::StudentRecord => "student_record",
            ResourceKind::Obligation => "obligation",
            ResourceKind::Payment => "payment",
            ResourceKind::Waiver => "waiver",
            ResourceKind::Clearance => "clearance",
            ResourceKind::ReportExport => "report_export",
            ResourceKind::AuditLog => "audit_log",
        }
    }
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];
}

/// Descriptor of the resource an operation targets.
///
/// Carries only what evaluation needs; the descriptor's tenant comes from the
/// stored entity, never from client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub tenant_id: Option<TenantId>,
    pub owner_subject_id: Option<SubjectId>,
    pub required_tier: Option<Tier>,
    pub contains_subject_pii: bool,
}

impl ResourceDescriptor {
    /// A tenant-owned resource with no individual owner.
    pub fn tenant_owned(kind: ResourceKind, tenant_id: TenantId) -> Self {
        Self {
            kind,
            tenant_id: Some(tenant_id),
            owner_subject_id: None,
            required_tier: None,
            contains_subject_pii: false,
        }
    }

    /// A tenant resource owned by one student (obligations, payments,
    /// clearance records).
    pub fn student_owned(kind: ResourceKind, tenant_id: TenantId, owner: SubjectId) -> Self {
        Self {
            kind,
            tenant_id: Some(tenant_id),
            owner_subject_id: Some(owner),
            required_tier: None,
            contains_subject_pii: false,
        }
    }

    /// A student's record proper: owned and PII-flagged.
    pub fn student_record(tenant_id: TenantId, owner: SubjectId) -> Self {
        Self {
            kind: ResourceKind::StudentRecord,
            tenant_id: Some(tenant_id),
            owner_subject_id: Some(owner),
            required_tier: None,
            contains_subject_pii: true,
        }
    }

    /// A platform-level resource not scoped to any tenant.
    pub fn platform(kind: ResourceKind) -> Self {
        Self {
            kind,
            tenant_id: None,
            owner_subject_id: None,
            required_tier: None,
            contains_subject_pii: false,
        }
    }

    pub fn with_required_tier(mut self, tier: Tier) -> Self {
        self.required_tier = Some(tier);
        self
    }

    pub fn with_pii(mut self) -> Self {
        self.contains_subject_pii = true;
        self
    }
}
