use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use rulegate_core::domain::nonce::{nonce_is_well_formed, UsedNonce};
use rulegate_core::domain::version::PolicyId;
use rulegate_db::repositories::{NonceInsert, NonceRepository, RepositoryError};

/// Why a nonce claim was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimRejection {
    /// Not a well-formed UUIDv4; refused without a storage round-trip.
    Malformed,
    /// Already claimed within its single-use window.
    AlreadyUsed,
}

#[derive(Clone)]
pub struct NonceGuard {
    repository: Arc<dyn NonceRepository>,
    ttl_secs: i64,
}

impl NonceGuard {
    pub fn new(repository: Arc<dyn NonceRepository>, ttl_secs: i64) -> Self {
        Self { repository, ttl_secs }
    }

    /// Atomically claims a nonce for single use. The storage layer's
    /// uniqueness constraint resolves concurrent claims; exactly one of
    /// N racing claims succeeds.
    pub async fn claim(
        &self,
        nonce: &str,
        policy_id: Option<PolicyId>,
        user_id: Option<String>,
    ) -> Result<Result<(), ClaimRejection>, RepositoryError> {
        if !nonce_is_well_formed(nonce) {
            debug!(nonce, "rejecting malformed nonce");
            return Ok(Err(ClaimRejection::Malformed));
        }

        let record = UsedNonce::claim_now(nonce, policy_id, user_id, self.ttl_secs);
        match self.repository.insert_if_absent(record).await? {
            NonceInsert::Inserted => Ok(Ok(())),
            NonceInsert::Duplicate => Ok(Err(ClaimRejection::AlreadyUsed)),
        }
    }

    /// Deletes expired nonce records. Safe to run concurrently with
    /// live claims; it only touches rows already past expiry.
    pub async fn sweep_expired(&self) -> Result<u64, RepositoryError> {
        self.repository.delete_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use rulegate_core::domain::nonce::NONCE_TTL_SECS;
    use rulegate_db::repositories::InMemoryNonceRepository;

    use super::{ClaimRejection, NonceGuard};

    fn guard() -> NonceGuard {
        NonceGuard::new(Arc::new(InMemoryNonceRepository::default()), NONCE_TTL_SECS)
    }

    #[tokio::test]
    async fn malformed_nonce_is_rejected_without_claiming() {
        let guard = guard();
        let outcome = guard.claim("not-a-uuid", None, None).await.expect("claim");
        assert_eq!(outcome, Err(ClaimRejection::Malformed));
    }

    #[tokio::test]
    async fn second_claim_is_already_used() {
        let guard = guard();
        let nonce = Uuid::new_v4().to_string();

        assert_eq!(guard.claim(&nonce, None, None).await.expect("first"), Ok(()));
        assert_eq!(
            guard.claim(&nonce, None, None).await.expect("second"),
            Err(ClaimRejection::AlreadyUsed)
        );
    }

    #[tokio::test]
    async fn sweep_with_no_expired_rows_deletes_nothing() {
        let guard = guard();
        guard.claim(&Uuid::new_v4().to_string(), None, None).await.expect("claim");
        assert_eq!(guard.sweep_expired().await.expect("sweep"), 0);
    }
}
