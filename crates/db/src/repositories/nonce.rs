use chrono::{DateTime, Utc};

use rulegate_core::domain::nonce::UsedNonce;

use super::{NonceInsert, NonceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNonceRepository {
    pool: DbPool,
}

impl SqlNonceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NonceRepository for SqlNonceRepository {
    async fn insert_if_absent(&self, nonce: UsedNonce) -> Result<NonceInsert, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO used_nonce (nonce, policy_id, user_id, used_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&nonce.nonce)
        .bind(nonce.policy_id.as_ref().map(|p| p.0.clone()))
        .bind(&nonce.user_id)
        .bind(nonce.used_at.to_rfc3339())
        .bind(nonce.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(NonceInsert::Inserted),
            // The primary key collision is the replay signal, not a
            // storage failure.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(NonceInsert::Duplicate)
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM used_nonce WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use rulegate_core::domain::nonce::{UsedNonce, NONCE_TTL_SECS};

    use super::SqlNonceRepository;
    use crate::repositories::{NonceInsert, NonceRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn second_claim_of_same_nonce_is_a_duplicate() {
        let pool = setup().await;
        let repo = SqlNonceRepository::new(pool);

        let claim = UsedNonce::claim_now(Uuid::new_v4().to_string(), None, None, NONCE_TTL_SECS);
        assert_eq!(repo.insert_if_absent(claim.clone()).await.expect("first"), NonceInsert::Inserted);
        assert_eq!(repo.insert_if_absent(claim).await.expect("second"), NonceInsert::Duplicate);
    }

    #[tokio::test]
    async fn concurrent_claims_yield_exactly_one_success() {
        let pool = setup().await;
        let repo = Arc::new(SqlNonceRepository::new(pool));
        let nonce = Uuid::new_v4().to_string();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let claim = UsedNonce::claim_now(nonce.clone(), None, None, NONCE_TTL_SECS);
            handles.push(tokio::spawn(async move { repo.insert_if_absent(claim).await }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.expect("join").expect("claim") == NonceInsert::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_rows() {
        let pool = setup().await;
        let repo = SqlNonceRepository::new(pool);
        let now = Utc::now();

        let mut expired = UsedNonce::claim_now(Uuid::new_v4().to_string(), None, None, 1);
        expired.used_at = now - Duration::seconds(700);
        expired.expires_at = now - Duration::seconds(100);
        repo.insert_if_absent(expired).await.expect("insert expired");

        let live = UsedNonce::claim_now(Uuid::new_v4().to_string(), None, None, NONCE_TTL_SECS);
        repo.insert_if_absent(live.clone()).await.expect("insert live");

        let deleted = repo.delete_expired(now).await.expect("sweep");
        assert_eq!(deleted, 1);

        // The live nonce is still claimed.
        assert_eq!(repo.insert_if_absent(live).await.expect("reclaim"), NonceInsert::Duplicate);
    }
}
