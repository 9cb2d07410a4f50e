use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use rulegate_core::audit::{AuditQuery, AuditStats, SecurityEvent};
use rulegate_core::domain::approval::PolicyApproval;
use rulegate_core::domain::nonce::UsedNonce;
use rulegate_core::domain::version::{PolicyId, PolicyVersion, VersionStatus};

use super::{
    ApprovalRepository, AuditRepository, NonceInsert, NonceRepository, RepositoryError,
    VersionRepository,
};

#[derive(Default)]
pub struct InMemoryVersionRepository {
    versions: RwLock<HashMap<(String, u32), PolicyVersion>>,
}

#[async_trait::async_trait]
impl VersionRepository for InMemoryVersionRepository {
    async fn find(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions.get(&(policy_id.0.clone(), version)).cloned())
    }

    async fn latest(&self, policy_id: &PolicyId) -> Result<Option<PolicyVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions
            .values()
            .filter(|v| v.policy_id == *policy_id)
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn find_default(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions.values().find(|v| v.policy_id == *policy_id && v.is_default).cloned())
    }

    async fn highest_approved(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions
            .values()
            .filter(|v| v.policy_id == *policy_id && v.status == VersionStatus::Approved)
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn save(&self, version: PolicyVersion) -> Result<(), RepositoryError> {
        let mut versions = self.versions.write().await;
        versions.insert((version.policy_id.0.clone(), version.version), version);
        Ok(())
    }

    async fn set_default(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<(), RepositoryError> {
        let mut versions = self.versions.write().await;
        for v in versions.values_mut() {
            if v.policy_id == *policy_id {
                v.is_default = v.version == version;
            }
        }
        Ok(())
    }

    async fn list(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        let mut result: Vec<PolicyVersion> =
            versions.values().filter(|v| v.policy_id == *policy_id).cloned().collect();
        result.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(result)
    }

    async fn list_executable(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<PolicyVersion>, RepositoryError> {
        let mut result = self.list(policy_id).await?;
        result.retain(|v| v.status.is_executable());
        Ok(result)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<Vec<PolicyApproval>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, approval: PolicyApproval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        approvals.push(approval);
        Ok(())
    }

    async fn list_for_version(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Vec<PolicyApproval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .filter(|a| a.policy_id == *policy_id && a.version == version)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryNonceRepository {
    nonces: RwLock<HashMap<String, UsedNonce>>,
}

#[async_trait::async_trait]
impl NonceRepository for InMemoryNonceRepository {
    async fn insert_if_absent(&self, nonce: UsedNonce) -> Result<NonceInsert, RepositoryError> {
        let mut nonces = self.nonces.write().await;
        if nonces.contains_key(&nonce.nonce) {
            return Ok(NonceInsert::Duplicate);
        }
        nonces.insert(nonce.nonce.clone(), nonce);
        Ok(NonceInsert::Inserted)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut nonces = self.nonces.write().await;
        let before = nonces.len();
        nonces.retain(|_, n| n.expires_at > now);
        Ok((before - nonces.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<SecurityEvent>>,
}

impl InMemoryAuditRepository {
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert(&self, event: SecurityEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn query(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<SecurityEvent>, u64), RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| {
                query.kind.map_or(true, |k| e.kind == k)
                    && query.severity.map_or(true, |s| e.severity == s)
                    && query.policy_id.as_ref().map_or(true, |p| e.policy_id.as_ref() == Some(p))
                    && query.user_id.as_ref().map_or(true, |u| e.user_id.as_ref() == Some(u))
                    && query.since.map_or(true, |t| e.occurred_at >= t)
                    && query.until.map_or(true, |t| e.occurred_at < t)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        let total = matching.len() as u64;
        let page: Vec<SecurityEvent> = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.effective_limit() as usize)
            .collect();
        Ok((page, total))
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<AuditStats, RepositoryError> {
        let events = self.events.read().await;
        let mut stats = AuditStats::default();
        let mut error_count = 0u64;

        for event in events.iter().filter(|e| e.occurred_at >= since) {
            stats.total += 1;
            *stats.by_kind.entry(event.kind.as_str().to_string()).or_insert(0) += 1;
            let severity = event.severity.as_str();
            if severity == "ERROR" || severity == "CRITICAL" {
                error_count += 1;
            }
            *stats.by_severity.entry(severity.to_string()).or_insert(0) += 1;
        }

        if stats.total > 0 {
            stats.error_rate = error_count as f64 / stats.total as f64;
        }
        Ok(stats)
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.occurred_at >= older_than);
        Ok((before - events.len()) as u64)
    }
}
