use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::{
    auth::{
        password::{hash_password_blocking, verify_password_blocking},
        repo::UserStore,
        repo_types::{normalize_email, NewUser, User},
    },
    error::{AuthError, AuthResult, StoreError},
    upstream::with_timeout,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Local signup and login against the user store. Holds no per-session state.
#[derive(Clone)]
pub struct LocalAuthService {
    users: Arc<dyn UserStore>,
    store_timeout: Duration,
}

impl LocalAuthService {
    pub fn new(users: Arc<dyn UserStore>, store_timeout: Duration) -> Self {
        Self {
            users,
            store_timeout,
        }
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);
        let name = name.trim();

        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AuthError::Validation("Invalid email".into()));
        }
        if name.is_empty() {
            return Err(AuthError::Validation("Name is required".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            warn!("password too short");
            return Err(AuthError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let hash = hash_password_blocking(password.to_owned()).await?;

        let new_user = NewUser {
            email: email.clone(),
            name: name.to_owned(),
            password_hash: Some(hash),
            profile_pic: String::new(),
        };
        let user = with_timeout("user store", self.store_timeout, async {
            self.users.create(new_user).await.map_err(|e| match e {
                StoreError::DuplicateEmail => {
                    warn!(email = %email, "email already registered");
                    AuthError::SignupConflict
                }
                other => other.into(),
            })
        })
        .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Single verification attempt; failures are returned, never retried.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);

        let user = with_timeout("user store", self.store_timeout, async {
            self.users.find_by_email(&email).await.map_err(AuthError::from)
        })
        .await?
        .ok_or_else(|| {
            warn!(email = %email, "login unknown email");
            AuthError::UserNotFound
        })?;

        let Some(stored) = user.credential() else {
            warn!(user_id = %user.id, "login on account without password");
            return Err(AuthError::NoLocalCredential);
        };

        if !verify_password_blocking(password.to_owned(), stored).await? {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredential);
        }

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(user)
    }
}
