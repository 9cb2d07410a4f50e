use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use rulegate_core::audit::{AuditQuery, AuditStats, SecurityEvent};
use rulegate_db::repositories::{AuditRepository, RepositoryError};

/// Outcome of a batch write. Individual failures are counted, never
/// propagated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
}

/// Append-only audit facade. A failed write is logged to the process
/// log and otherwise swallowed so that auditing can never fail the
/// operation being audited.
#[derive(Clone)]
pub struct AuditLog {
    repository: Arc<dyn AuditRepository>,
}

impl AuditLog {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    pub async fn record(&self, event: SecurityEvent) {
        let kind = event.kind;
        if let Err(error) = self.repository.insert(event).await {
            warn!(kind = kind.as_str(), %error, "audit event write failed, dropping event");
        }
    }

    pub async fn record_batch(&self, events: Vec<SecurityEvent>) -> BatchResult {
        let mut result = BatchResult::default();
        for event in events {
            let kind = event.kind;
            match self.repository.insert(event).await {
                Ok(()) => result.success += 1,
                Err(error) => {
                    result.failed += 1;
                    warn!(kind = kind.as_str(), %error, "audit event write failed, dropping event");
                }
            }
        }
        result
    }

    pub async fn query(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<SecurityEvent>, u64), RepositoryError> {
        self.repository.query(query).await
    }

    pub async fn stats(&self, since: DateTime<Utc>) -> Result<AuditStats, RepositoryError> {
        self.repository.stats(since).await
    }

    pub async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.repository.purge(older_than).await
    }
}
