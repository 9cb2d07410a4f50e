use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use rulegate_core::audit::{AuditQuery, AuditStats, SecurityEvent};
use rulegate_core::domain::approval::PolicyApproval;
use rulegate_core::domain::nonce::UsedNonce;
use rulegate_core::domain::version::{PolicyId, PolicyVersion};

pub mod approval;
pub mod audit;
pub mod memory;
pub mod nonce;
pub mod version;

pub use approval::SqlApprovalRepository;
pub use audit::SqlAuditRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryAuditRepository, InMemoryNonceRepository,
    InMemoryVersionRepository,
};
pub use nonce::SqlNonceRepository;
pub use version::SqlVersionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Outcome of an atomic nonce claim. A uniqueness violation is a
/// distinct, expected result, not a storage failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceInsert {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn find(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Option<PolicyVersion>, RepositoryError>;

    /// Highest version number for a policy, regardless of status.
    async fn latest(&self, policy_id: &PolicyId) -> Result<Option<PolicyVersion>, RepositoryError>;

    async fn find_default(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError>;

    /// Highest-numbered APPROVED version.
    async fn highest_approved(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError>;

    async fn save(&self, version: PolicyVersion) -> Result<(), RepositoryError>;

    /// Clears any existing default and marks `version` as default, as a
    /// single transaction.
    async fn set_default(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<(), RepositoryError>;

    async fn list(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, RepositoryError>;

    /// APPROVED and DEPRECATED versions, newest first.
    async fn list_executable(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<PolicyVersion>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, approval: PolicyApproval) -> Result<(), RepositoryError>;

    async fn list_for_version(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Vec<PolicyApproval>, RepositoryError>;
}

#[async_trait]
pub trait NonceRepository: Send + Sync {
    /// Atomic insert-if-absent. Two concurrent claims of the same nonce
    /// must yield exactly one `Inserted`.
    async fn insert_if_absent(&self, nonce: UsedNonce) -> Result<NonceInsert, RepositoryError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, event: SecurityEvent) -> Result<(), RepositoryError>;

    async fn query(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<SecurityEvent>, u64), RepositoryError>;

    async fn stats(&self, since: DateTime<Utc>) -> Result<AuditStats, RepositoryError>;

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
