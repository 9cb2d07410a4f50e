use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use rulegate_core::audit::{EventKind, SecurityEvent, Severity};
use rulegate_core::domain::approval::{ApprovalDecision, PolicyApproval};
use rulegate_core::domain::version::{PolicyId, PolicyVersion, VersionStatus};
use rulegate_core::errors::DomainError;
use rulegate_core::integrity::chain_hash;
use rulegate_db::repositories::{ApprovalRepository, RepositoryError, VersionRepository};

use crate::audit_log::AuditLog;

#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("policy `{0}` has no version {1}")]
    VersionNotFound(String, u32),
    #[error("version {version} of policy `{policy_id}` is {status:?}, not executable")]
    NotExecutable { policy_id: String, version: u32, status: VersionStatus },
    #[error("policy `{0}` has no approved version")]
    NoApprovedVersion(String),
    #[error("version {1} of policy `{0}` can only be edited in DRAFT status")]
    NotDraft(String, u32),
    #[error("approver `{0}` created this version; a second pair of eyes is required")]
    SelfApproval(String),
    #[error("version {1} of policy `{0}` is the current default; promote a replacement first")]
    DefaultVersion(String, u32),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A version selected for execution, with the deprecation flag callers
/// must surface.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVersion {
    pub version: PolicyVersion,
    pub is_deprecated: bool,
}

/// Version store and approval workflow over chained, four-eyes-gated
/// policy versions.
#[derive(Clone)]
pub struct VersionService {
    versions: Arc<dyn VersionRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    audit: AuditLog,
}

impl VersionService {
    pub fn new(
        versions: Arc<dyn VersionRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        audit: AuditLog,
    ) -> Self {
        Self { versions, approvals, audit }
    }

    /// Creates the next version of a policy as a DRAFT, chaining its
    /// content hash to the latest existing version.
    pub async fn create_version(
        &self,
        policy_id: PolicyId,
        source: impl Into<String>,
        creator: impl Into<String>,
        release_note: Option<String>,
    ) -> Result<PolicyVersion, VersioningError> {
        let source = source.into();
        let creator = creator.into();
        let latest = self.versions.latest(&policy_id).await?;
        let (number, prev_hash) = match latest {
            Some(prev) => (prev.version + 1, Some(prev.content_hash)),
            None => (1, None),
        };

        let now = Utc::now();
        let version = PolicyVersion {
            policy_id: policy_id.clone(),
            version: number,
            content_hash: chain_hash(&source, prev_hash.as_ref()),
            prev_hash,
            source,
            status: VersionStatus::Draft,
            is_default: false,
            created_by: creator.clone(),
            release_note,
            deprecated_by: None,
            deprecated_at: None,
            archived_by: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        self.versions.save(version.clone()).await?;

        info!(policy_id = %policy_id.0, version = number, "created policy version");
        self.audit
            .record(
                SecurityEvent::new(EventKind::VersionCreated, Severity::Info)
                    .with_policy(policy_id)
                    .with_user(creator)
                    .with_details(json!({
                        "version": number,
                        "hash": version.content_hash.as_str(),
                    })),
            )
            .await;

        Ok(version)
    }

    /// Replaces the source of a still-unapproved DRAFT in place. The
    /// chained hash is recomputed against the version's own `prev_hash`,
    /// not the current latest, so chain integrity is preserved.
    pub async fn update_source(
        &self,
        policy_id: &PolicyId,
        version: u32,
        source: impl Into<String>,
    ) -> Result<PolicyVersion, VersioningError> {
        let mut existing = self.require(policy_id, version).await?;
        if existing.status != VersionStatus::Draft {
            return Err(VersioningError::NotDraft(policy_id.0.clone(), version));
        }

        existing.source = source.into();
        existing.content_hash = chain_hash(&existing.source, existing.prev_hash.as_ref());
        existing.updated_at = Utc::now();
        self.versions.save(existing.clone()).await?;
        Ok(existing)
    }

    /// DRAFT or REJECTED -> PENDING_APPROVAL.
    pub async fn submit_for_approval(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<PolicyVersion, VersioningError> {
        let mut existing = self.require(policy_id, version).await?;
        existing.transition_to(VersionStatus::PendingApproval)?;
        self.versions.save(existing.clone()).await?;

        self.audit
            .record(
                SecurityEvent::new(EventKind::VersionSubmitted, Severity::Info)
                    .with_policy(policy_id.clone())
                    .with_details(json!({ "version": version })),
            )
            .await;
        Ok(existing)
    }

    /// Records an approval decision. The approver must differ from the
    /// version's creator; a self-approval attempt is refused and audited.
    pub async fn decide(
        &self,
        policy_id: &PolicyId,
        version: u32,
        approver_id: impl Into<String>,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<PolicyVersion, VersioningError> {
        let approver_id = approver_id.into();
        let mut existing = self.require(policy_id, version).await?;

        if existing.status != VersionStatus::PendingApproval {
            return Err(DomainError::InvalidVersionTransition {
                from: existing.status,
                to: VersionStatus::Approved,
            }
            .into());
        }

        if approver_id == existing.created_by {
            self.audit
                .record(
                    SecurityEvent::new(EventKind::SelfApprovalAttempt, Severity::Warning)
                        .with_policy(policy_id.clone())
                        .with_user(approver_id.clone())
                        .with_details(json!({
                            "version": version,
                            "decision": decision.as_str(),
                        })),
                )
                .await;
            return Err(VersioningError::SelfApproval(approver_id));
        }

        let next = match decision {
            ApprovalDecision::Approved => VersionStatus::Approved,
            ApprovalDecision::Rejected => VersionStatus::Rejected,
            ApprovalDecision::RequestedChanges => VersionStatus::Draft,
        };
        existing.transition_to(next)?;

        self.approvals
            .insert(PolicyApproval::new(
                policy_id.clone(),
                version,
                approver_id.clone(),
                decision,
                comment,
            ))
            .await?;
        self.versions.save(existing.clone()).await?;

        info!(
            policy_id = %policy_id.0,
            version,
            decision = decision.as_str(),
            "recorded approval decision"
        );
        self.audit
            .record(
                SecurityEvent::new(EventKind::ApprovalDecision, Severity::Info)
                    .with_policy(policy_id.clone())
                    .with_user(approver_id)
                    .with_details(json!({
                        "version": version,
                        "decision": decision.as_str(),
                    })),
            )
            .await;

        Ok(existing)
    }

    /// Promotes an APPROVED version to the policy default. Clearing the
    /// old default and setting the new one happen in one transaction.
    pub async fn set_default(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<(), VersioningError> {
        let target = self.require(policy_id, version).await?;
        if target.status != VersionStatus::Approved {
            return Err(VersioningError::NotExecutable {
                policy_id: policy_id.0.clone(),
                version,
                status: target.status,
            });
        }

        self.versions.set_default(policy_id, version).await?;

        self.audit
            .record(
                SecurityEvent::new(EventKind::DefaultChanged, Severity::Info)
                    .with_policy(policy_id.clone())
                    .with_details(json!({ "version": version })),
            )
            .await;
        Ok(())
    }

    pub async fn deprecate(
        &self,
        policy_id: &PolicyId,
        version: u32,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<PolicyVersion, VersioningError> {
        let actor = actor.into();
        let mut existing = self.require(policy_id, version).await?;
        if existing.is_default {
            return Err(VersioningError::DefaultVersion(policy_id.0.clone(), version));
        }

        existing.transition_to(VersionStatus::Deprecated)?;
        existing.deprecated_by = Some(actor.clone());
        existing.deprecated_at = Some(Utc::now());
        self.versions.save(existing.clone()).await?;

        self.audit
            .record(
                SecurityEvent::new(EventKind::VersionDeprecated, Severity::Info)
                    .with_policy(policy_id.clone())
                    .with_user(actor)
                    .with_details(json!({ "version": version, "reason": reason })),
            )
            .await;
        Ok(existing)
    }

    pub async fn archive(
        &self,
        policy_id: &PolicyId,
        version: u32,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<PolicyVersion, VersioningError> {
        let actor = actor.into();
        let mut existing = self.require(policy_id, version).await?;
        if existing.is_default {
            return Err(VersioningError::DefaultVersion(policy_id.0.clone(), version));
        }

        existing.transition_to(VersionStatus::Archived)?;
        existing.archived_by = Some(actor.clone());
        existing.archived_at = Some(Utc::now());
        self.versions.save(existing.clone()).await?;

        self.audit
            .record(
                SecurityEvent::new(EventKind::VersionArchived, Severity::Info)
                    .with_policy(policy_id.clone())
                    .with_user(actor)
                    .with_details(json!({ "version": version, "reason": reason })),
            )
            .await;
        Ok(existing)
    }

    pub async fn list_versions(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<PolicyVersion>, VersioningError> {
        Ok(self.versions.list(policy_id).await?)
    }

    pub async fn list_executable(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<PolicyVersion>, VersioningError> {
        Ok(self.versions.list_executable(policy_id).await?)
    }

    pub async fn get_source(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<String, VersioningError> {
        Ok(self.require(policy_id, version).await?.source)
    }

    pub async fn approvals_for(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Vec<PolicyApproval>, VersioningError> {
        Ok(self.approvals.list_for_version(policy_id, version).await?)
    }

    /// Selects the version to execute. An explicit version must be
    /// APPROVED or DEPRECATED; otherwise the default wins, then the
    /// highest-numbered APPROVED version. Having no candidate at all is
    /// its own error.
    pub async fn resolve_executable(
        &self,
        policy_id: &PolicyId,
        version: Option<u32>,
    ) -> Result<ResolvedVersion, VersioningError> {
        if let Some(number) = version {
            let target = self.require(policy_id, number).await?;
            if !target.status.is_executable() {
                return Err(VersioningError::NotExecutable {
                    policy_id: policy_id.0.clone(),
                    version: number,
                    status: target.status,
                });
            }
            let is_deprecated = target.status == VersionStatus::Deprecated;
            return Ok(ResolvedVersion { version: target, is_deprecated });
        }

        if let Some(default) = self.versions.find_default(policy_id).await? {
            if default.status.is_executable() {
                let is_deprecated = default.status == VersionStatus::Deprecated;
                return Ok(ResolvedVersion { version: default, is_deprecated });
            }
        }

        match self.versions.highest_approved(policy_id).await? {
            Some(best) => Ok(ResolvedVersion { version: best, is_deprecated: false }),
            None => Err(VersioningError::NoApprovedVersion(policy_id.0.clone())),
        }
    }

    async fn require(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<PolicyVersion, VersioningError> {
        self.versions
            .find(policy_id, version)
            .await?
            .ok_or_else(|| VersioningError::VersionNotFound(policy_id.0.clone(), version))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rulegate_core::audit::EventKind;
    use rulegate_core::domain::approval::ApprovalDecision;
    use rulegate_core::domain::version::{PolicyId, VersionStatus};
    use rulegate_core::integrity::chain_hash;
    use rulegate_db::repositories::{InMemoryApprovalRepository, InMemoryAuditRepository, InMemoryVersionRepository};

    use crate::audit_log::AuditLog;

    use super::{VersionService, VersioningError};

    fn service() -> (VersionService, Arc<InMemoryAuditRepository>) {
        let audit_repo = Arc::new(InMemoryAuditRepository::default());
        let service = VersionService::new(
            Arc::new(InMemoryVersionRepository::default()),
            Arc::new(InMemoryApprovalRepository::default()),
            AuditLog::new(audit_repo.clone()),
        );
        (service, audit_repo)
    }

    fn policy() -> PolicyId {
        PolicyId("pol-1".to_string())
    }

    #[tokio::test]
    async fn versions_are_dense_and_hash_chained() {
        let (service, _) = service();

        let v1 = service
            .create_version(policy(), "if age < 18 then deny Underage", "u-author", None)
            .await
            .expect("v1");
        let v2 = service
            .create_version(policy(), "if age < 21 then deny Underage", "u-author", None)
            .await
            .expect("v2");

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.prev_hash, Some(v1.content_hash.clone()));
        assert_eq!(v2.content_hash, chain_hash(&v2.source, Some(&v1.content_hash)));
    }

    #[tokio::test]
    async fn update_source_rechains_against_own_prev_hash() {
        let (service, _) = service();

        let v1 = service.create_version(policy(), "original", "u-author", None).await.expect("v1");
        service.create_version(policy(), "second", "u-author", None).await.expect("v2");

        // Editing v1 keeps prev_hash = None even though v2 now exists.
        let edited = service.update_source(&policy(), 1, "edited").await.expect("update");
        assert_eq!(edited.prev_hash, v1.prev_hash);
        assert_eq!(edited.content_hash, chain_hash("edited", None));
    }

    #[tokio::test]
    async fn update_source_refuses_non_draft() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");

        let error = service.update_source(&policy(), 1, "tampered").await.expect_err("refuse");
        assert!(matches!(error, VersioningError::NotDraft(_, 1)));
    }

    #[tokio::test]
    async fn self_approval_is_refused_and_audited() {
        let (service, audit) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");

        let error = service
            .decide(&policy(), 1, "u-author", ApprovalDecision::Approved, None)
            .await
            .expect_err("self approval");
        assert!(matches!(error, VersioningError::SelfApproval(_)));

        let events = audit.events().await;
        assert!(events.iter().any(|e| e.kind == EventKind::SelfApprovalAttempt));

        // The version is still awaiting a real reviewer.
        let versions = service.list_versions(&policy()).await.expect("list");
        assert_eq!(versions[0].status, VersionStatus::PendingApproval);
    }

    #[tokio::test]
    async fn self_rejection_is_also_refused() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");

        for decision in [
            ApprovalDecision::Rejected,
            ApprovalDecision::RequestedChanges,
            ApprovalDecision::Approved,
        ] {
            let error = service
                .decide(&policy(), 1, "u-author", decision, None)
                .await
                .expect_err("self decision");
            assert!(matches!(error, VersioningError::SelfApproval(_)));
        }
    }

    #[tokio::test]
    async fn requested_changes_return_the_version_to_draft() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");

        let version = service
            .decide(
                &policy(),
                1,
                "u-reviewer",
                ApprovalDecision::RequestedChanges,
                Some("please add a bound".to_string()),
            )
            .await
            .expect("decide");
        assert_eq!(version.status, VersionStatus::Draft);

        let decisions = service.approvals_for(&policy(), 1).await.expect("approvals");
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision, ApprovalDecision::RequestedChanges);
    }

    #[tokio::test]
    async fn set_default_requires_approved_status() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        let error = service.set_default(&policy(), 1).await.expect_err("draft default");
        assert!(matches!(error, VersioningError::NotExecutable { .. }));
    }

    #[tokio::test]
    async fn default_version_cannot_be_deprecated_or_archived() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");
        service
            .decide(&policy(), 1, "u-reviewer", ApprovalDecision::Approved, None)
            .await
            .expect("approve");
        service.set_default(&policy(), 1).await.expect("default");

        let error =
            service.deprecate(&policy(), 1, "u-admin", None).await.expect_err("deprecate default");
        assert!(matches!(error, VersioningError::DefaultVersion(_, 1)));

        let error =
            service.archive(&policy(), 1, "u-admin", None).await.expect_err("archive default");
        assert!(matches!(error, VersioningError::DefaultVersion(_, 1)));
    }

    #[tokio::test]
    async fn resolver_prefers_explicit_then_default_then_highest_approved() {
        let (service, _) = service();

        for source in ["v1 source", "v2 source", "v3 source"] {
            let v = service.create_version(policy(), source, "u-author", None).await.expect("create");
            service.submit_for_approval(&policy(), v.version).await.expect("submit");
            service
                .decide(&policy(), v.version, "u-reviewer", ApprovalDecision::Approved, None)
                .await
                .expect("approve");
        }

        // No default: highest approved wins.
        let resolved = service.resolve_executable(&policy(), None).await.expect("resolve");
        assert_eq!(resolved.version.version, 3);

        // Default wins over highest.
        service.set_default(&policy(), 2).await.expect("default");
        let resolved = service.resolve_executable(&policy(), None).await.expect("resolve");
        assert_eq!(resolved.version.version, 2);

        // Explicit wins over default.
        let resolved = service.resolve_executable(&policy(), Some(1)).await.expect("resolve");
        assert_eq!(resolved.version.version, 1);
        assert!(!resolved.is_deprecated);
    }

    #[tokio::test]
    async fn resolving_a_deprecated_version_sets_the_flag() {
        let (service, _) = service();

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        service.submit_for_approval(&policy(), 1).await.expect("submit");
        service
            .decide(&policy(), 1, "u-reviewer", ApprovalDecision::Approved, None)
            .await
            .expect("approve");
        service.deprecate(&policy(), 1, "u-admin", None).await.expect("deprecate");

        let resolved = service.resolve_executable(&policy(), Some(1)).await.expect("resolve");
        assert!(resolved.is_deprecated);
    }

    #[tokio::test]
    async fn resolver_distinguishes_absent_and_non_executable() {
        let (service, _) = service();

        let error = service.resolve_executable(&policy(), None).await.expect_err("empty policy");
        assert!(matches!(error, VersioningError::NoApprovedVersion(_)));

        service.create_version(policy(), "source", "u-author", None).await.expect("v1");
        let error =
            service.resolve_executable(&policy(), Some(1)).await.expect_err("draft version");
        assert!(matches!(error, VersioningError::NotExecutable { .. }));

        let error = service.resolve_executable(&policy(), Some(9)).await.expect_err("no such");
        assert!(matches!(error, VersioningError::VersionNotFound(_, 9)));
    }
}
