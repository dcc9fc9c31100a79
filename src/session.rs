// src/session.rs - Server-side sessions and the per-request session context
//!
//! A session row is opened when a user signs in and closed when they sign
//! out. Tokens carry the session id, and the JWT middleware refuses tokens
//! whose session is no longer open. Handlers receive the authenticated
//! principal as an explicit [`SessionContext`] instead of reading it from
//! ambient state.

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::access::{can_perform, Action, Role};
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub async fn open(pool: &SqlitePool, user_id: &str, lifetime: Duration) -> ApiResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + lifetime,
            closed_at: None,
        };

        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, closed_at) VALUES (?, ?, ?, ?, NULL)"
        )
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(pool)
            .await?;

        Ok(session)
    }

    /// Returns `false` when the session was already closed or never existed.
    pub async fn close(pool: &SqlitePool, id: &str) -> ApiResult<bool> {
        let result = sqlx::query("UPDATE sessions SET closed_at = ? WHERE id = ? AND closed_at IS NULL")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Closes an open session and opens its successor in one transaction.
    /// `None` when the session was already closed or has expired.
    pub async fn rotate(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
        lifetime: Duration,
    ) -> ApiResult<Option<Session>> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let closed = sqlx::query(
            "UPDATE sessions SET closed_at = ? WHERE id = ? AND user_id = ? AND closed_at IS NULL AND expires_at > ?"
        )
            .bind(now)
            .bind(id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if closed.rows_affected() == 0 {
            return Ok(None);
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + lifetime,
            closed_at: None,
        };
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, closed_at) VALUES (?, ?, ?, ?, NULL)"
        )
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(session))
    }

    pub async fn close_all_for_user(pool: &SqlitePool, user_id: &str) -> ApiResult<u64> {
        let result = sqlx::query("UPDATE sessions SET closed_at = ? WHERE user_id = ? AND closed_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_open(pool: &SqlitePool, id: &str) -> ApiResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM sessions WHERE id = ? AND closed_at IS NULL AND expires_at > ?"
        )
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    /// Deletes expired or closed sessions older than `keep`.
    pub async fn purge_stale(pool: &SqlitePool, keep: Duration) -> ApiResult<u64> {
        let cutoff = Utc::now() - keep;
        let result = sqlx::query(
            "DELETE FROM sessions WHERE expires_at < ? OR (closed_at IS NOT NULL AND closed_at < ?)"
        )
            .bind(cutoff)
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub role: Role,
}

/// The authenticated caller of one request.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub principal: Principal,
}

impl SessionContext {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            session_id: claims.sid,
            principal: Principal {
                id: claims.sub,
                username: claims.username,
                role: claims.role,
            },
        }
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }

    pub fn user_id(&self) -> &str {
        &self.principal.id
    }

    pub fn can(&self, action: Action) -> bool {
        can_perform(self.principal.role, action)
    }

    pub fn require(&self, action: Action) -> ApiResult<()> {
        if self.can(action) {
            Ok(())
        } else {
            log::warn!(
                "User {} ({}) denied action {}",
                self.principal.username,
                self.principal.role,
                action
            );
            Err(ApiError::insufficient_role())
        }
    }
}

impl FromRequest for SessionContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = req
            .extensions()
            .get::<Claims>()
            .cloned()
            .map(SessionContext::from_claims)
            .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()));
        ready(result)
    }
}
