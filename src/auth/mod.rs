mod password;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub use password::{hash_password, verify_password};

/// Owner identity attached to every analyze request. The job pipeline only
/// ever sees the id.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Debug)]
struct SessionEntry {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-memory bearer sessions. Tokens die with the process; clients re-login.
#[derive(Debug)]
pub struct AuthManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: ChronoDuration,
}

impl AuthManager {
    pub fn new(token_ttl_hours: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::hours(token_ttl_hours),
        }
    }

    pub async fn issue_for_user(&self, user_id: Uuid) -> String {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        let token = URL_SAFE_NO_PAD.encode(buf);
        let expires_at = Utc::now() + self.ttl;
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token.clone(),
            SessionEntry {
                user_id,
                expires_at,
            },
        );
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<Uuid> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get(token)?;
        if entry.expires_at <= Utc::now() {
            sessions.remove(token);
            return None;
        }
        Some(entry.user_id)
    }

    pub async fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let expired: Vec<String> = sessions
            .iter()
            .filter_map(|(token, entry)| (entry.expires_at <= now).then(|| token.clone()))
            .collect();
        for token in &expired {
            sessions.remove(token);
        }
        expired.len()
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthManager>: FromRef<S>,
    PgPool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let manager = Arc::<AuthManager>::from_ref(state);
        let db = PgPool::from_ref(state);
        let token_result: Result<String, AppError> = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid token"));

        async move {
            let token = token_result?;
            let user_id = manager
                .resolve(&token)
                .await
                .ok_or_else(|| AppError::unauthorized("Missing or invalid token"))?;
            let user = resolve_user_from_db(&db, user_id).await?;
            Ok(AuthUser(user))
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserAuthRow {
    id: Uuid,
    email: String,
    role: String,
}

async fn resolve_user_from_db(db: &PgPool, user_id: Uuid) -> AppResult<AuthenticatedUser> {
    let row: Option<UserAuthRow> = sqlx::query_as(
        r#"
        SELECT id, email, role
        FROM users
        WHERE id = $1
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "database error");
        AppError::internal("Internal server error")
    })?;

    let row = row.ok_or_else(|| AppError::unauthorized("Missing or invalid token"))?;

    Ok(AuthenticatedUser {
        id: row.id,
        email: row.email,
        role: row.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_tokens_resolve_to_their_user() {
        let manager = AuthManager::new(24);
        let user_id = Uuid::new_v4();
        let token = manager.issue_for_user(user_id).await;

        assert_eq!(manager.resolve(&token).await, Some(user_id));
        assert_eq!(manager.resolve("not-a-token").await, None);
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected_and_pruned() {
        let manager = AuthManager::new(-1);
        let token = manager.issue_for_user(Uuid::new_v4()).await;

        assert_eq!(manager.resolve(&token).await, None);

        let other = manager.issue_for_user(Uuid::new_v4()).await;
        let pruned = manager.prune_expired().await;
        assert_eq!(pruned, 1);
        assert_eq!(manager.resolve(&other).await, None);
    }

    #[tokio::test]
    async fn tokens_are_unique_per_issue() {
        let manager = AuthManager::new(24);
        let user_id = Uuid::new_v4();
        let a = manager.issue_for_user(user_id).await;
        let b = manager.issue_for_user(user_id).await;
        assert_ne!(a, b);
    }
}
