use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{normalize_email, NewUser, User};
use crate::error::StoreError;

/// Persistent user records keyed by unique email.
///
/// `create` must reject a second record for an email atomically with the
/// insert; callers rely on this rather than on a prior `find_by_email`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    /// Find a user by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, profile_pic, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, profile_pic, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    /// Insert a user; the unique index on `email` turns a racing duplicate into
    /// SQLSTATE 23505, surfaced as [`StoreError::DuplicateEmail`].
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash, profile_pic)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, name, password_hash, profile_pic, created_at
            "#,
        )
        .bind(normalize_email(&user.email))
        .bind(&user.name)
        .bind(user.password_hash.map(|h| h.into_string()))
        .bind(&user.profile_pic)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }
}

/// In-process store used by tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&normalize_email(email)).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let email = normalize_email(&user.email);
        // check and insert under one write lock
        let mut users = self.users.write().await;
        if users.contains_key(&email) {
            return Err(StoreError::DuplicateEmail);
        }
        let created = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            name: user.name,
            password_hash: user.password_hash.map(|h| h.into_string()),
            profile_pic: user.profile_pic,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(email, created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Alice".into(),
            password_hash: None,
            profile_pic: String::new(),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_lookup_is_case_insensitive() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("Alice@X.com")).await.unwrap();
        assert_eq!(created.email, "alice@x.com");

        let found = store.find_by_email("ALICE@x.COM").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        let by_id = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@x.com");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice@x.com")).await.unwrap();
        let err = store.create(new_user(" alice@X.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_creates_produce_one_row() {
        let store = Arc::new(MemoryUserStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create(new_user("race@x.com")).await })
            })
            .collect();

        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_lookups_return_none() {
        let store = MemoryUserStore::new();
        assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
