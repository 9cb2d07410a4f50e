use chrono::{DateTime, Utc};
use sqlx::Row;

use rulegate_core::audit::{AuditQuery, AuditStats, EventKind, SecurityEvent, Severity};
use rulegate_core::domain::version::PolicyId;

use super::{AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<SecurityEvent, RepositoryError> {
    let event_id: String =
        row.try_get("event_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let kind_str: String =
        row.try_get("kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let severity_str: String =
        row.try_get("severity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let policy_id: Option<String> =
        row.try_get("policy_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: Option<String> =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ip_address: Option<String> =
        row.try_get("ip_address").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_agent: Option<String> =
        row.try_get("user_agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: Option<String> =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let details_str: String =
        row.try_get("details").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at_str: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let kind = EventKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown event kind `{kind_str}`")))?;
    let severity = Severity::parse(&severity_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity_str}`")))?;
    let details = serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null);
    let occurred_at = DateTime::parse_from_rfc3339(&occurred_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("occurred_at `{occurred_at_str}`: {e}")))?;

    Ok(SecurityEvent {
        event_id,
        kind,
        severity,
        policy_id: policy_id.map(PolicyId),
        user_id,
        ip_address,
        user_agent,
        request_id,
        details,
        occurred_at,
    })
}

fn build_filter(query: &AuditQuery) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(kind) = query.kind {
        clauses.push("kind = ?");
        binds.push(kind.as_str().to_string());
    }
    if let Some(severity) = query.severity {
        clauses.push("severity = ?");
        binds.push(severity.as_str().to_string());
    }
    if let Some(policy_id) = &query.policy_id {
        clauses.push("policy_id = ?");
        binds.push(policy_id.0.clone());
    }
    if let Some(user_id) = &query.user_id {
        clauses.push("user_id = ?");
        binds.push(user_id.clone());
    }
    if let Some(since) = query.since {
        clauses.push("occurred_at >= ?");
        binds.push(since.to_rfc3339());
    }
    if let Some(until) = query.until {
        clauses.push("occurred_at < ?");
        binds.push(until.to_rfc3339());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, binds)
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn insert(&self, event: SecurityEvent) -> Result<(), RepositoryError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO security_event (event_id, kind, severity, policy_id, user_id,
                                         ip_address, user_agent, request_id, details, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.kind.as_str())
        .bind(event.severity.as_str())
        .bind(event.policy_id.as_ref().map(|p| p.0.clone()))
        .bind(&event.user_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.request_id)
        .bind(details)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        query: &AuditQuery,
    ) -> Result<(Vec<SecurityEvent>, u64), RepositoryError> {
        let (where_sql, binds) = build_filter(query);

        let count_sql = format!("SELECT COUNT(*) AS count FROM security_event{where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let total = count_query.fetch_one(&self.pool).await?.get::<i64, _>("count") as u64;

        let select_sql = format!(
            "SELECT event_id, kind, severity, policy_id, user_id, ip_address, user_agent,
                    request_id, details, occurred_at
             FROM security_event{where_sql}
             ORDER BY occurred_at DESC
             LIMIT ? OFFSET ?"
        );
        let mut select_query = sqlx::query(&select_sql);
        for bind in &binds {
            select_query = select_query.bind(bind);
        }
        let rows = select_query
            .bind(query.effective_limit() as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()?;
        Ok((events, total))
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<AuditStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT kind, severity, COUNT(*) AS count
             FROM security_event
             WHERE occurred_at >= ?
             GROUP BY kind, severity",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = AuditStats::default();
        let mut error_count = 0u64;
        for row in rows {
            let kind: String =
                row.try_get("kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let severity: String =
                row.try_get("severity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let count =
                row.try_get::<i64, _>("count").map_err(|e| RepositoryError::Decode(e.to_string()))?
                    as u64;

            stats.total += count;
            *stats.by_kind.entry(kind).or_insert(0) += count;
            if severity == "ERROR" || severity == "CRITICAL" {
                error_count += count;
            }
            *stats.by_severity.entry(severity).or_insert(0) += count;
        }

        if stats.total > 0 {
            stats.error_rate = error_count as f64 / stats.total as f64;
        }
        Ok(stats)
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM security_event WHERE occurred_at < ?")
            .bind(older_than.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
