use chrono::{DateTime, Utc};
use sqlx::Row;

use rulegate_core::domain::version::{PolicyId, PolicyVersion, VersionStatus};
use rulegate_core::integrity::ContentHash;

use super::{RepositoryError, VersionRepository};
use crate::DbPool;

pub struct SqlVersionRepository {
    pool: DbPool,
}

impl SqlVersionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const VERSION_COLUMNS: &str = "policy_id, version, source, content_hash, prev_hash, status,
            is_default, created_by, release_note, deprecated_by, deprecated_at,
            archived_by, archived_at, created_at, updated_at";

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{raw}`: {e}")))
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyVersion, RepositoryError> {
    let policy_id: String =
        row.try_get("policy_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let source: String =
        row.try_get("source").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content_hash_str: String =
        row.try_get("content_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let prev_hash_str: Option<String> =
        row.try_get("prev_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_default: bool =
        row.try_get("is_default").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by: String =
        row.try_get("created_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let release_note: Option<String> =
        row.try_get("release_note").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deprecated_by: Option<String> =
        row.try_get("deprecated_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deprecated_at_str: Option<String> =
        row.try_get("deprecated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let archived_by: Option<String> =
        row.try_get("archived_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let archived_at_str: Option<String> =
        row.try_get("archived_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let content_hash = ContentHash::parse(&content_hash_str)
        .map_err(|e| RepositoryError::Decode(format!("content_hash: {e}")))?;
    let prev_hash = prev_hash_str
        .map(|s| ContentHash::parse(&s))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("prev_hash: {e}")))?;
    let status = VersionStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown version status `{status_str}`")))?;

    Ok(PolicyVersion {
        policy_id: PolicyId(policy_id),
        version: version as u32,
        source,
        content_hash,
        prev_hash,
        status,
        is_default,
        created_by,
        release_note,
        deprecated_by,
        deprecated_at: deprecated_at_str.as_deref().map(parse_datetime).transpose()?,
        archived_by,
        archived_at: archived_at_str.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&created_at_str)?,
        updated_at: parse_datetime(&updated_at_str)?,
    })
}

#[async_trait::async_trait]
impl VersionRepository for SqlVersionRepository {
    async fn find(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version WHERE policy_id = ? AND version = ?"
        ))
        .bind(&policy_id.0)
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }

    async fn latest(&self, policy_id: &PolicyId) -> Result<Option<PolicyVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version
             WHERE policy_id = ? ORDER BY version DESC LIMIT 1"
        ))
        .bind(&policy_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }

    async fn find_default(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version
             WHERE policy_id = ? AND is_default = 1 LIMIT 1"
        ))
        .bind(&policy_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }

    async fn highest_approved(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version
             WHERE policy_id = ? AND status = 'APPROVED'
             ORDER BY version DESC LIMIT 1"
        ))
        .bind(&policy_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, version: PolicyVersion) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policy_version (policy_id, version, source, content_hash, prev_hash,
                                         status, is_default, created_by, release_note,
                                         deprecated_by, deprecated_at, archived_by, archived_at,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(policy_id, version) DO UPDATE SET
                 source = excluded.source,
                 content_hash = excluded.content_hash,
                 prev_hash = excluded.prev_hash,
                 status = excluded.status,
                 is_default = excluded.is_default,
                 release_note = excluded.release_note,
                 deprecated_by = excluded.deprecated_by,
                 deprecated_at = excluded.deprecated_at,
                 archived_by = excluded.archived_by,
                 archived_at = excluded.archived_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&version.policy_id.0)
        .bind(version.version as i64)
        .bind(&version.source)
        .bind(version.content_hash.as_str())
        .bind(version.prev_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(version.status.as_str())
        .bind(version.is_default)
        .bind(&version.created_by)
        .bind(&version.release_note)
        .bind(&version.deprecated_by)
        .bind(version.deprecated_at.map(|dt| dt.to_rfc3339()))
        .bind(&version.archived_by)
        .bind(version.archived_at.map(|dt| dt.to_rfc3339()))
        .bind(version.created_at.to_rfc3339())
        .bind(version.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_default(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<(), RepositoryError> {
        // Clear-then-set must be one transaction so no reader observes
        // zero or two defaults.
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE policy_version SET is_default = 0 WHERE policy_id = ?")
            .bind(&policy_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE policy_version SET is_default = 1, updated_at = ?
             WHERE policy_id = ? AND version = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&policy_id.0)
        .bind(version as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version
             WHERE policy_id = ? ORDER BY version DESC"
        ))
        .bind(&policy_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_version).collect::<Result<Vec<_>, _>>()
    }

    async fn list_executable(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<PolicyVersion>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_version
             WHERE policy_id = ? AND status IN ('APPROVED', 'DEPRECATED')
             ORDER BY version DESC"
        ))
        .bind(&policy_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_version).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use rulegate_core::domain::version::{PolicyId, PolicyVersion, VersionStatus};
    use rulegate_core::integrity::{chain_hash, hash_content};

    use super::SqlVersionRepository;
    use crate::repositories::{RepositoryError, VersionRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_version(policy_id: &str, version: u32, status: VersionStatus) -> PolicyVersion {
        let now = Utc::now();
        let source = format!("if age < {version} then deny Underage");
        PolicyVersion {
            policy_id: PolicyId(policy_id.to_string()),
            version,
            source: source.clone(),
            content_hash: hash_content(&source),
            prev_hash: None,
            status,
            is_default: false,
            created_by: "u-author".to_string(),
            release_note: None,
            deprecated_by: None,
            deprecated_at: None,
            archived_by: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_hashes_and_status() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool);

        let mut v2 = sample_version("pol-1", 2, VersionStatus::Approved);
        let prev = hash_content("earlier source");
        v2.content_hash = chain_hash(&v2.source, Some(&prev));
        v2.prev_hash = Some(prev);
        repo.save(v2.clone()).await.expect("save");

        let found = repo
            .find(&PolicyId("pol-1".to_string()), 2)
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.content_hash, v2.content_hash);
        assert_eq!(found.prev_hash, v2.prev_hash);
        assert_eq!(found.status, VersionStatus::Approved);
    }

    #[tokio::test]
    async fn latest_returns_highest_version_number() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool);
        let policy = PolicyId("pol-1".to_string());

        for n in 1..=3 {
            repo.save(sample_version("pol-1", n, VersionStatus::Draft)).await.expect("save");
        }

        let latest = repo.latest(&policy).await.expect("latest").expect("exists");
        assert_eq!(latest.version, 3);
    }

    #[tokio::test]
    async fn highest_approved_ignores_other_statuses() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool);
        let policy = PolicyId("pol-1".to_string());

        repo.save(sample_version("pol-1", 1, VersionStatus::Approved)).await.expect("save 1");
        repo.save(sample_version("pol-1", 2, VersionStatus::Approved)).await.expect("save 2");
        repo.save(sample_version("pol-1", 3, VersionStatus::Draft)).await.expect("save 3");

        let highest = repo.highest_approved(&policy).await.expect("query").expect("exists");
        assert_eq!(highest.version, 2);
    }

    #[tokio::test]
    async fn set_default_leaves_exactly_one_default() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool);
        let policy = PolicyId("pol-1".to_string());

        let mut v1 = sample_version("pol-1", 1, VersionStatus::Approved);
        v1.is_default = true;
        repo.save(v1).await.expect("save 1");
        repo.save(sample_version("pol-1", 2, VersionStatus::Approved)).await.expect("save 2");

        repo.set_default(&policy, 2).await.expect("set default");

        let versions = repo.list(&policy).await.expect("list");
        let defaults: Vec<u32> =
            versions.iter().filter(|v| v.is_default).map(|v| v.version).collect();
        assert_eq!(defaults, vec![2]);
    }

    #[tokio::test]
    async fn list_executable_includes_deprecated_but_not_draft() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool);
        let policy = PolicyId("pol-1".to_string());

        repo.save(sample_version("pol-1", 1, VersionStatus::Deprecated)).await.expect("save 1");
        repo.save(sample_version("pol-1", 2, VersionStatus::Approved)).await.expect("save 2");
        repo.save(sample_version("pol-1", 3, VersionStatus::Draft)).await.expect("save 3");

        let executable = repo.list_executable(&policy).await.expect("list");
        let numbers: Vec<u32> = executable.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn corrupt_stored_timestamp_surfaces_a_decode_error() {
        let pool = setup().await;
        let repo = SqlVersionRepository::new(pool.clone());
        repo.save(sample_version("pol-1", 1, VersionStatus::Approved)).await.expect("save");

        sqlx::query("UPDATE policy_version SET created_at = 'not-a-timestamp'")
            .execute(&pool)
            .await
            .expect("corrupt row");

        let error = repo
            .find(&PolicyId("pol-1".to_string()), 1)
            .await
            .expect_err("corrupt timestamp should not decode");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }
}
