use chrono::{DateTime, Utc};
use sqlx::Row;

use rulegate_core::domain::approval::{ApprovalDecision, ApprovalId, PolicyApproval};
use rulegate_core::domain::version::PolicyId;

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyApproval, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let policy_id: String =
        row.try_get("policy_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decision_str: String =
        row.try_get("decision").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comment: Option<String> =
        row.try_get("comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at_str: String =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let decision = ApprovalDecision::parse(&decision_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval decision `{decision_str}`"))
    })?;
    let decided_at = DateTime::parse_from_rfc3339(&decided_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("decided_at `{decided_at_str}`: {e}")))?;

    Ok(PolicyApproval {
        id: ApprovalId(id),
        policy_id: PolicyId(policy_id),
        version: version as u32,
        approver_id,
        decision,
        comment,
        decided_at,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn insert(&self, approval: PolicyApproval) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policy_approval (id, policy_id, version, approver_id, decision,
                                          comment, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.policy_id.0)
        .bind(approval.version as i64)
        .bind(&approval.approver_id)
        .bind(approval.decision.as_str())
        .bind(&approval.comment)
        .bind(approval.decided_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_version(
        &self,
        policy_id: &PolicyId,
        version: u32,
    ) -> Result<Vec<PolicyApproval>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, policy_id, version, approver_id, decision, comment, decided_at
             FROM policy_approval
             WHERE policy_id = ? AND version = ?
             ORDER BY decided_at DESC",
        )
        .bind(&policy_id.0)
        .bind(version as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()
    }
}
