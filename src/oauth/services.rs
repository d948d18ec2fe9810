use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::{
    auth::{
        repo::UserStore,
        repo_types::{NewUser, User},
    },
    error::{AuthError, AuthResult, StoreError},
    oauth::resolver::ExternalIdentity,
    upstream::with_timeout,
};

/// Find-or-create of local users for identities resolved by the provider.
#[derive(Clone)]
pub struct OAuthLoginService {
    users: Arc<dyn UserStore>,
    store_timeout: Duration,
}

impl OAuthLoginService {
    pub fn new(users: Arc<dyn UserStore>, store_timeout: Duration) -> Self {
        Self {
            users,
            store_timeout,
        }
    }

    async fn find(&self, email: &str) -> AuthResult<Option<User>> {
        with_timeout("user store", self.store_timeout, async {
            self.users.find_by_email(email).await.map_err(AuthError::from)
        })
        .await
    }

    /// Returns the user for `identity` and whether this call created it.
    ///
    /// Two callbacks racing for the same new email both miss the lookup; the
    /// store lets one insert through and the loser re-reads the winner's row.
    pub async fn login_with_identity(&self, identity: &ExternalIdentity) -> AuthResult<(User, bool)> {
        if let Some(user) = self.find(&identity.email).await? {
            debug!(user_id = %user.id, "existing user for oauth identity");
            return Ok((user, false));
        }

        let new_user = NewUser {
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            password_hash: None,
            profile_pic: identity.picture.clone().unwrap_or_default(),
        };
        let created = with_timeout("user store", self.store_timeout, async {
            match self.users.create(new_user).await {
                Ok(user) => Ok(Some(user)),
                Err(StoreError::DuplicateEmail) => Ok(None),
                Err(e) => Err(AuthError::from(e)),
            }
        })
        .await?;

        match created {
            Some(user) => {
                info!(user_id = %user.id, email = %user.email, "user created from oauth identity");
                Ok((user, true))
            }
            None => {
                debug!(email = %identity.email, "lost oauth create race; re-reading");
                let user = self.find(&identity.email).await?.ok_or_else(|| {
                    AuthError::Internal("user vanished after duplicate insert".into())
                })?;
                Ok((user, false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::MemoryUserStore;
    use async_trait::async_trait;
    use tokio::sync::Barrier;
    use uuid::Uuid;

    fn identity(email: &str) -> ExternalIdentity {
        ExternalIdentity {
            email: email.into(),
            display_name: "Test User".into(),
            picture: Some("https://example.com/p.png".into()),
        }
    }

    #[tokio::test]
    async fn first_login_creates_then_returns_existing() {
        let store = Arc::new(MemoryUserStore::new());
        let svc = OAuthLoginService::new(store.clone(), Duration::from_secs(1));

        let (first, created) = svc.login_with_identity(&identity("new@x.com")).await.unwrap();
        assert!(created);
        assert_eq!(first.name, "Test User");
        assert_eq!(first.profile_pic, "https://example.com/p.png");
        assert!(first.password_hash.is_none());

        let (second, created) = svc.login_with_identity(&identity("new@x.com")).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn existing_local_user_is_returned_unchanged() {
        let store = Arc::new(MemoryUserStore::new());
        let local = store
            .create(NewUser {
                email: "alice@x.com".into(),
                name: "Alice".into(),
                password_hash: Some(crate::auth::password::hash_password("secret123").unwrap()),
                profile_pic: String::new(),
            })
            .await
            .unwrap();
        let svc = OAuthLoginService::new(store, Duration::from_secs(1));

        let (user, created) = svc.login_with_identity(&identity("alice@x.com")).await.unwrap();
        assert!(!created);
        assert_eq!(user.id, local.id);
        assert_eq!(user.name, "Alice");
        assert!(user.password_hash.is_some());
    }

    /// Store whose lookups wait until both racers have looked, so both miss.
    struct RacingStore {
        inner: MemoryUserStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl UserStore for RacingStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let found = self.inner.find_by_email(email).await?;
            if found.is_none() && self.inner.is_empty().await {
                self.barrier.wait().await;
            }
            Ok(found)
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn create(&self, user: NewUser) -> Result<User, StoreError> {
            self.inner.create(user).await
        }
    }

    #[tokio::test]
    async fn concurrent_callbacks_create_exactly_one_user() {
        let store = Arc::new(RacingStore {
            inner: MemoryUserStore::new(),
            barrier: Barrier::new(2),
        });
        let svc = OAuthLoginService::new(store.clone(), Duration::from_secs(5));

        let a = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.login_with_identity(&identity("race@x.com")).await })
        };
        let b = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.login_with_identity(&identity("race@x.com")).await })
        };

        let (ua, ca) = a.await.unwrap().unwrap();
        let (ub, cb) = b.await.unwrap().unwrap();

        assert_eq!(ua.id, ub.id);
        assert!(ca ^ cb, "exactly one call reports created");
        assert_eq!(store.inner.len().await, 1);
    }
}
