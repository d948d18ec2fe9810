//! Pending OAuth handshakes: CSRF `state` -> PKCE verifier, single use, short-lived.
//!
//! This only correlates `/login/google` with `/login/callback`. It carries no
//! authentication authority; sessions are JWTs issued after the callback.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::StoreError;

pub const STATE_TTL: Duration = Duration::minutes(10);

#[derive(Debug, Clone)]
pub struct PendingState {
    pub state: String,
    pub pkce_verifier: String,
    pub expires_at: OffsetDateTime,
}

impl PendingState {
    pub fn new(state: String, pkce_verifier: String) -> Self {
        Self {
            state,
            pkce_verifier,
            expires_at: OffsetDateTime::now_utc() + STATE_TTL,
        }
    }

    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    async fn put(&self, pending: PendingState) -> Result<(), StoreError>;

    /// Removes and returns the entry; `None` if unknown, already used or expired.
    async fn take(&self, state: &str) -> Result<Option<PendingState>, StoreError>;
}

#[derive(Clone)]
pub struct PgOAuthStateStore {
    db: PgPool,
}

impl PgOAuthStateStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OAuthStateStore for PgOAuthStateStore {
    async fn put(&self, pending: PendingState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (state, pkce_verifier, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&pending.state)
        .bind(&pending.pkce_verifier)
        .bind(pending.expires_at)
        .execute(&self.db)
        .await?;

        // opportunistic cleanup of abandoned handshakes
        sqlx::query("DELETE FROM oauth_states WHERE expires_at <= NOW()")
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<PendingState>, StoreError> {
        let row: Option<(String, String, OffsetDateTime)> = sqlx::query_as(
            r#"
            DELETE FROM oauth_states
            WHERE state = $1 AND expires_at > NOW()
            RETURNING state, pkce_verifier, expires_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(state, pkce_verifier, expires_at)| PendingState {
            state,
            pkce_verifier,
            expires_at,
        }))
    }
}

#[derive(Default)]
pub struct MemoryOAuthStateStore {
    pending: Mutex<HashMap<String, PendingState>>,
}

impl MemoryOAuthStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OAuthStateStore for MemoryOAuthStateStore {
    async fn put(&self, pending: PendingState) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut map = self.pending.lock().await;
        map.retain(|_, p| p.is_live(now));
        map.insert(pending.state.clone(), pending);
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<PendingState>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let taken = self.pending.lock().await.remove(state);
        Ok(taken.filter(|p| p.is_live(now)))
    }
}
