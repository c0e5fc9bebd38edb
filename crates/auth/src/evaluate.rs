//! The policy interpreter.
//!
//! One function evaluates every declarative rule shape. Default-deny: absence
//! of a matching rule is a deny, never an allow; a resource kind with no
//! registered rules yields zero access.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use bursar_audit::{AuditAction, AuditEntry, AuditEntryId, AuditError, AuditSink};
use bursar_core::Tier;

use crate::policy::{PolicyRule, PolicySet};
use crate::principal::{Principal, Role};
use crate::resource::{Operation, ResourceDescriptor};

/// Internal denial cause.
///
/// Never rendered to untrusted callers: the user-visible shape of every
/// denial is the uniform "not permitted" (see [`AuthzError`]'s `Display`),
/// so denials cannot be used to enumerate tenants or roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    NotAuthenticated,
    TenantMismatch,
    RoleInsufficient,
    TierInsufficient,
    PiiRestricted,
    ReasonRequired,
}

impl DenyReason {
    /// How far along the rule checks this failure occurred. When several
    /// rules fail for different causes, the most specific one is reported
    /// internally (tenant < role < tier).
    fn specificity(self) -> u8 {
        match self {
            DenyReason::NotAuthenticated => 0,
            DenyReason::TenantMismatch => 1,
            DenyReason::RoleInsufficient => 2,
            DenyReason::TierInsufficient => 3,
            DenyReason::PiiRestricted => 4,
            DenyReason::ReasonRequired => 5,
        }
    }
}

/// Authorization denial.
///
/// The `Display` form is deliberately uniform regardless of cause; the
/// internal reason is available to trusted code via [`AuthzError::reason`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("not permitted")]
pub struct AuthzError {
    reason: DenyReason,
}

impl AuthzError {
    pub fn denied(reason: DenyReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> DenyReason {
        self.reason
    }
}

/// Caller-supplied context the evaluator cannot derive from claims alone.
///
/// Tier gating needs the tenant's subscription tier; the caller looks it up
/// from the tenant store so the evaluator stays pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationContext {
    pub tenant_tier: Option<Tier>,
}

impl EvaluationContext {
    pub fn with_tier(tier: Tier) -> Self {
        Self {
            tenant_tier: Some(tier),
        }
    }
}

/// Evaluate whether `principal` may perform `op` on `resource`.
///
/// Union semantics: rules are not mutually exclusive, and any rule covering
/// the operation may grant it, with one exception: PII-flagged resources are
/// never reachable cross-tenant outside the privileged path, even when a
/// broader platform grant would otherwise apply (deny wins that tie).
pub fn evaluate(
    policies: &PolicySet,
    principal: &Principal,
    resource: &ResourceDescriptor,
    op: Operation,
    ctx: &EvaluationContext,
) -> Result<(), AuthzError> {
    if !principal.verified {
        return deny(principal, resource, op, DenyReason::NotAuthenticated);
    }

    if resource.contains_subject_pii && principal.role == Role::PlatformAdmin {
        return deny(principal, resource, op, DenyReason::PiiRestricted);
    }

    let mut best_failure: Option<DenyReason> = None;
    fn fail(reason: DenyReason, best: &mut Option<DenyReason>) {
        if best.map_or(true, |b| reason.specificity() > b.specificity()) {
            *best = Some(reason);
        }
    }

    for rule in policies.rules_for(resource.kind) {
        if !rule.covers(op) {
            continue;
        }

        match rule {
            PolicyRule::TenantScoped { .. } => {
                if principal.in_tenant(resource.tenant_id) {
                    return Ok(());
                }
                fail(DenyReason::TenantMismatch, &mut best_failure);
            }
            PolicyRule::RoleGated { roles, .. } => {
                if !principal.in_tenant(resource.tenant_id) {
                    fail(DenyReason::TenantMismatch, &mut best_failure);
                } else if roles.contains(&principal.role) {
                    return Ok(());
                } else {
                    fail(DenyReason::RoleInsufficient, &mut best_failure);
                }
            }
            PolicyRule::TierGated { required_tier, .. } => {
                // The effective gate is the stricter of the rule's tier and
                // the descriptor's per-resource requirement.
                let required = resource
                    .required_tier
                    .map_or(*required_tier, |r| r.max(*required_tier));
                if !principal.in_tenant(resource.tenant_id) {
                    fail(DenyReason::TenantMismatch, &mut best_failure);
                } else if ctx.tenant_tier.is_some_and(|t| t.satisfies(required)) {
                    return Ok(());
                } else {
                    fail(DenyReason::TierInsufficient, &mut best_failure);
                }
            }
            PolicyRule::SelfAccess { .. } => {
                if principal.role == Role::Student
                    && resource.owner_subject_id == Some(principal.subject_id)
                {
                    return Ok(());
                }
                fail(DenyReason::RoleInsufficient, &mut best_failure);
            }
            PolicyRule::PlatformCrossTenant { .. } => {
                // PII-flagged resources were already rejected above.
                if principal.role == Role::PlatformAdmin {
                    return Ok(());
                }
                fail(DenyReason::RoleInsufficient, &mut best_failure);
            }
            PolicyRule::PrivilegedAudited { .. } => {
                // Only grantable through `privileged_read`.
                let reason = if principal.role == Role::PlatformAdmin {
                    DenyReason::PiiRestricted
                } else {
                    DenyReason::RoleInsufficient
                };
                fail(reason, &mut best_failure);
            }
        }
    }

    deny(
        principal,
        resource,
        op,
        best_failure.unwrap_or(DenyReason::RoleInsufficient),
    )
}

fn deny(
    principal: &Principal,
    resource: &ResourceDescriptor,
    op: Operation,
    reason: DenyReason,
) -> Result<(), AuthzError> {
    debug!(
        subject = %principal.subject_id,
        role = %principal.role,
        kind = resource.kind.as_str(),
        ?op,
        ?reason,
        "authorization denied"
    );
    Err(AuthzError::denied(reason))
}

/// Proof that a privileged read was granted and audited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedGrant {
    pub audit_entry_id: AuditEntryId,
    pub granted_at: DateTime<Utc>,
}

/// Privileged read failure. Uniform "not permitted" display either way; the
/// audit-unavailable case exists so operators can distinguish an outage from
/// a policy denial in logs.
#[derive(Debug, Error)]
pub enum PrivilegedReadError {
    #[error("not permitted")]
    Denied(#[from] AuthzError),

    #[error("not permitted")]
    AuditUnavailable(#[source] AuditError),
}

/// The distinguished cross-tenant read path for PII-flagged resources.
///
/// Requires a non-empty justification and writes a `PrivilegedRead` audit
/// entry *before* granting; if the audit write fails the read fails with it
/// (fail-closed). Exactly one entry is produced per successful grant.
pub fn privileged_read(
    policies: &PolicySet,
    principal: &Principal,
    resource: &ResourceDescriptor,
    entity_id: &str,
    access_reason: &str,
    audit: &dyn AuditSink,
    now: DateTime<Utc>,
) -> Result<PrivilegedGrant, PrivilegedReadError> {
    if !principal.verified {
        return Err(AuthzError::denied(DenyReason::NotAuthenticated).into());
    }
    if principal.role != Role::PlatformAdmin {
        return Err(AuthzError::denied(DenyReason::RoleInsufficient).into());
    }

    let privileged_rule_present = policies
        .rules_for(resource.kind)
        .iter()
        .any(|rule| matches!(rule, PolicyRule::PrivilegedAudited { .. }) && rule.covers(Operation::Read));
    if !privileged_rule_present {
        return Err(AuthzError::denied(DenyReason::RoleInsufficient).into());
    }

    if access_reason.trim().is_empty() {
        return Err(AuthzError::denied(DenyReason::ReasonRequired).into());
    }

    let mut entry = AuditEntry::new(
        resource.kind.as_str(),
        entity_id,
        AuditAction::PrivilegedRead,
        principal.subject_id,
        now,
    )
    .with_access_reason(access_reason);
    if let Some(tenant_id) = resource.tenant_id {
        entry = entry.with_tenant(tenant_id);
    }

    let audit_entry_id = audit
        .record(entry)
        .map_err(PrivilegedReadError::AuditUnavailable)?;

    debug!(
        subject = %principal.subject_id,
        kind = resource.kind.as_str(),
        entity_id,
        "privileged read granted"
    );

    Ok(PrivilegedGrant {
        audit_entry_id,
        granted_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use bursar_audit::{FailingAuditSink, InMemoryAuditLog};
    use bursar_core::{SubjectId, TenantId};
    use proptest::prelude::*;

    fn officer(tenant: TenantId, role: Role) -> Principal {
        Principal::officer(SubjectId::new(), tenant, role)
    }

    #[test]
    fn tenant_isolation_denies_every_operation() {
        let policies = PolicySet::standard();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let principal = officer(tenant_a, Role::OrgAdmin);
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::Obligation, tenant_b);

        for op in Operation::ALL {
            let err = evaluate(
                &policies,
                &principal,
                &resource,
                op,
                &EvaluationContext::default(),
            )
            .unwrap_err();
            assert_eq!(err.reason(), DenyReason::TenantMismatch, "op {op:?}");
        }
    }

    #[test]
    fn tenant_scoped_rule_grants_any_member() {
        let mut policies = PolicySet::empty();
        policies.register(
            ResourceKind::Organization,
            PolicyRule::TenantScoped {
                ops: vec![Operation::Read],
            },
        );
        let tenant = TenantId::new();
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::Organization, tenant);

        for principal in [
            officer(tenant, Role::OrgStaff),
            Principal::student(SubjectId::new(), tenant),
        ] {
            assert!(
                evaluate(
                    &policies,
                    &principal,
                    &resource,
                    Operation::Read,
                    &EvaluationContext::default(),
                )
                .is_ok()
            );
        }

        // Covered operations only: the rule grants Read, nothing else.
        let member = officer(tenant, Role::OrgStaff);
        assert!(
            evaluate(
                &policies,
                &member,
                &resource,
                Operation::Update,
                &EvaluationContext::default(),
            )
            .is_err()
        );
    }

    #[test]
    fn empty_policy_set_denies_everyone() {
        let policies = PolicySet::empty();
        let tenant = TenantId::new();
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::Payment, tenant);

        for principal in [
            officer(tenant, Role::OrgAdmin),
            Principal::student(SubjectId::new(), tenant),
            Principal::platform_admin(SubjectId::new()),
        ] {
            assert!(
                evaluate(
                    &policies,
                    &principal,
                    &resource,
                    Operation::Read,
                    &EvaluationContext::default(),
                )
                .is_err()
            );
        }
    }

    #[test]
    fn role_absent_from_allowed_set_yields_no_grant() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::Payment, tenant);

        // Staff may read payments but not decide them.
        let staff = officer(tenant, Role::OrgStaff);
        assert!(
            evaluate(
                &policies,
                &staff,
                &resource,
                Operation::Read,
                &EvaluationContext::default()
            )
            .is_ok()
        );
        let err = evaluate(
            &policies,
            &staff,
            &resource,
            Operation::Update,
            &EvaluationContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::RoleInsufficient);

        let manager = officer(tenant, Role::OrgManager);
        assert!(
            evaluate(
                &policies,
                &manager,
                &resource,
                Operation::Update,
                &EvaluationContext::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn tier_gate_respects_total_order() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let principal = officer(tenant, Role::OrgAdmin);
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::ReportExport, tenant)
            .with_required_tier(Tier::Plus);

        let err = evaluate(
            &policies,
            &principal,
            &resource,
            Operation::Read,
            &EvaluationContext::with_tier(Tier::Basic),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::TierInsufficient);

        for tier in [Tier::Plus, Tier::Premium] {
            assert!(
                evaluate(
                    &policies,
                    &principal,
                    &resource,
                    Operation::Read,
                    &EvaluationContext::with_tier(tier),
                )
                .is_ok(),
                "tier {tier}"
            );
        }
    }

    #[test]
    fn missing_tier_context_denies_tier_gated_access() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let principal = officer(tenant, Role::OrgAdmin);
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::ReportExport, tenant);

        let err = evaluate(
            &policies,
            &principal,
            &resource,
            Operation::Read,
            &EvaluationContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::TierInsufficient);
    }

    #[test]
    fn student_reads_own_record_but_not_anothers() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let student = Principal::student(SubjectId::new(), tenant);

        let own =
            ResourceDescriptor::student_owned(ResourceKind::Obligation, tenant, student.subject_id);
        assert!(
            evaluate(
                &policies,
                &student,
                &own,
                Operation::Read,
                &EvaluationContext::default()
            )
            .is_ok()
        );

        let other =
            ResourceDescriptor::student_owned(ResourceKind::Obligation, tenant, SubjectId::new());
        let err = evaluate(
            &policies,
            &student,
            &other,
            Operation::Read,
            &EvaluationContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::RoleInsufficient);
    }

    #[test]
    fn unverified_principal_is_not_authenticated() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let mut principal = officer(tenant, Role::OrgAdmin);
        principal.verified = false;
        let resource = ResourceDescriptor::tenant_owned(ResourceKind::Payment, tenant);

        let err = evaluate(
            &policies,
            &principal,
            &resource,
            Operation::Read,
            &EvaluationContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::NotAuthenticated);
    }

    #[test]
    fn pii_restriction_beats_platform_grant() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let admin = Principal::platform_admin(SubjectId::new());
        let record = ResourceDescriptor::student_record(tenant, SubjectId::new());

        let err = evaluate(
            &policies,
            &admin,
            &record,
            Operation::Read,
            &EvaluationContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), DenyReason::PiiRestricted);

        // Tenant officers are unaffected: PII restriction targets
        // cross-tenant access, not in-tenant work.
        let staff = officer(tenant, Role::OrgStaff);
        assert!(
            evaluate(
                &policies,
                &staff,
                &record,
                Operation::Read,
                &EvaluationContext::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn privileged_read_requires_reason() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let admin = Principal::platform_admin(SubjectId::new());
        let record = ResourceDescriptor::student_record(tenant, SubjectId::new());
        let audit = InMemoryAuditLog::new();

        let err = privileged_read(
            &policies,
            &admin,
            &record,
            "student-1",
            "   ",
            &audit,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            PrivilegedReadError::Denied(e) => assert_eq!(e.reason(), DenyReason::ReasonRequired),
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(audit.is_empty());
    }

    #[test]
    fn privileged_read_writes_exactly_one_audit_entry() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let admin = Principal::platform_admin(SubjectId::new());
        let record = ResourceDescriptor::student_record(tenant, SubjectId::new());
        let audit = InMemoryAuditLog::new();

        let grant = privileged_read(
            &policies,
            &admin,
            &record,
            "student-1",
            "support ticket #1",
            &audit,
            Utc::now(),
        )
        .unwrap();

        let entries = audit.for_entity("student_record", "student-1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::PrivilegedRead);
        assert_eq!(entries[0].access_reason.as_deref(), Some("support ticket #1"));
        assert_eq!(entries[0].id, grant.audit_entry_id);
    }

    #[test]
    fn privileged_read_fails_closed_when_audit_sink_fails() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let admin = Principal::platform_admin(SubjectId::new());
        let record = ResourceDescriptor::student_record(tenant, SubjectId::new());

        let err = privileged_read(
            &policies,
            &admin,
            &record,
            "student-1",
            "support ticket #2",
            &FailingAuditSink,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PrivilegedReadError::AuditUnavailable(_)));
    }

    #[test]
    fn privileged_read_denied_for_non_platform_roles() {
        let policies = PolicySet::standard();
        let tenant = TenantId::new();
        let record = ResourceDescriptor::student_record(tenant, SubjectId::new());
        let audit = InMemoryAuditLog::new();

        let officer = officer(tenant, Role::OrgAdmin);
        let err = privileged_read(
            &policies,
            &officer,
            &record,
            "student-1",
            "curiosity",
            &audit,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            PrivilegedReadError::Denied(e) => {
                assert_eq!(e.reason(), DenyReason::RoleInsufficient)
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(audit.is_empty());
    }

    #[test]
    fn denial_display_is_uniform() {
        let a = AuthzError::denied(DenyReason::TenantMismatch);
        let b = AuthzError::denied(DenyReason::TierInsufficient);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "not permitted");
    }

    fn arb_tier() -> impl Strategy<Value = Tier> {
        prop_oneof![Just(Tier::Basic), Just(Tier::Plus), Just(Tier::Premium)]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: if a tier satisfies a gate, every higher tier does too,
        /// and no lower tier does (tier gating is monotone in the total order).
        #[test]
        fn tier_gating_is_monotone(required in arb_tier(), granted in arb_tier()) {
            let policies = PolicySet::standard();
            let tenant = TenantId::new();
            let principal = officer(tenant, Role::OrgAdmin);
            let resource = ResourceDescriptor::tenant_owned(ResourceKind::ReportExport, tenant)
                .with_required_tier(required);

            let allowed = evaluate(
                &policies,
                &principal,
                &resource,
                Operation::Read,
                &EvaluationContext::with_tier(granted),
            )
            .is_ok();

            // The standard registry gates report export at Plus; the
            // effective requirement is the stricter of the two.
            let effective = required.max(Tier::Plus);
            prop_assert_eq!(allowed, granted >= effective);
        }

        /// Property: principals of tenant A are denied with a tenant-mismatch
        /// cause on tenant B's resources, for any distinct pair of tenants.
        #[test]
        fn cross_tenant_access_is_always_a_mismatch(
            seed_a in any::<u128>(),
            seed_b in any::<u128>(),
        ) {
            prop_assume!(seed_a != seed_b);
            let tenant_a = TenantId::from_uuid(uuid::Uuid::from_u128(seed_a));
            let tenant_b = TenantId::from_uuid(uuid::Uuid::from_u128(seed_b));

            let policies = PolicySet::standard();
            let principal = officer(tenant_a, Role::OrgAdmin);
            let resource = ResourceDescriptor::tenant_owned(ResourceKind::Obligation, tenant_b);

            let err = evaluate(
                &policies,
                &principal,
                &resource,
                Operation::Read,
                &EvaluationContext::default(),
            )
            .unwrap_err();
            prop_assert_eq!(err.reason(), DenyReason::TenantMismatch);
        }
    }
}
