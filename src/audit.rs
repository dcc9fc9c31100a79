// src/audit.rs - Audit trail of sign-ins, catalog changes and report decisions

use actix_web::HttpRequest;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use strum::{AsRefStr, Display};
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::ApiResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    LoginFailed,
    Refresh,
    Logout,
    Create,
    Update,
    Delete,
    Submit,
    Approve,
    Reject,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

/// Records an event in audit_logs.
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: AuditAction,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(action.as_ref())
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Shorthand for handlers; a failed audit write is logged, never surfaced.
pub async fn audit(
    pool: &SqlitePool,
    user_id: &str,
    action: AuditAction,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

pub async fn list(pool: &SqlitePool, query: &AuditQuery) -> ApiResult<Vec<AuditLog>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<&str> = Vec::new();
    if let Some(ref entity_type) = query.entity_type {
        conditions.push("a.entity_type = ?");
        params.push(entity_type);
    }
    if let Some(ref entity_id) = query.entity_id {
        conditions.push("a.entity_id = ?");
        params.push(entity_id);
    }
    if let Some(ref user_id) = query.user_id {
        conditions.push("a.user_id = ?");
        params.push(user_id);
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        r#"SELECT a.id, a.user_id, u.username, a.action, a.entity_type, a.entity_id,
                  a.description, a.ip_address, a.user_agent, a.created_at
           FROM audit_logs a
           LEFT JOIN users u ON u.id = a.user_id{}
           ORDER BY a.created_at DESC, a.rowid DESC
           LIMIT ?"#,
        where_clause
    );

    let mut select = sqlx::query_as::<_, AuditLog>(&sql);
    for param in params {
        select = select.bind(param);
    }
    let logs = select
        .bind(query.limit.unwrap_or(100).clamp(1, 1000))
        .fetch_all(pool)
        .await?;
    Ok(logs)
}

/// Deletes entries older than `retention_days`, in chunks of 1000.
pub async fn purge_older_than(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let mut total_deleted = 0;

    loop {
        let result = sqlx::query(
            "DELETE FROM audit_logs
             WHERE id IN (
                 SELECT id FROM audit_logs
                 WHERE created_at < ?
                 LIMIT 1000
             )"
        )
        .bind(cutoff)
        .execute(pool)
        .await?;

        let count = result.rows_affected();
        total_deleted += count;
        if count < 1000 {
            break;
        }
        sleep(std::time::Duration::from_millis(50)).await;
    }

    Ok(total_deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::test_support;

    #[tokio::test]
    async fn test_log_and_filter() {
        let pool = test_support::pool().await;
        let manager = test_support::user(&pool, "mgr01", Role::Manager).await;

        log_activity(&pool, Some(&manager.id), AuditAction::Create, "product", Some("p1"), Some("Created product"), None)
            .await
            .unwrap();
        log_activity(&pool, Some(&manager.id), AuditAction::Approve, "lab_report", Some("r1"), None, None)
            .await
            .unwrap();

        let reports = list(
            &pool,
            &AuditQuery {
                entity_type: Some("lab_report".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].action, "APPROVE");
        assert_eq!(reports[0].username.as_deref(), Some("mgr01"));

        assert_eq!(list(&pool, &AuditQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_entries() {
        let pool = test_support::pool().await;
        log_activity(&pool, None, AuditAction::LoginFailed, "user", None, Some("unknown user"), None)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO audit_logs (id, action, entity_type, created_at) VALUES ('old', 'LOGIN', 'user', ?)"
        )
            .bind(Utc::now() - Duration::days(400))
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(purge_older_than(&pool, 365).await.unwrap(), 1);
        assert_eq!(list(&pool, &AuditQuery::default()).await.unwrap().len(), 1);
    }
}
