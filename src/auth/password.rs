use std::fmt;

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{AuthError, AuthResult};

/// Argon2id digest in PHC string format (algorithm, params and salt embedded).
#[derive(Clone, PartialEq, Eq)]
pub struct HashedCredential(String);

impl HashedCredential {
    /// Wraps a digest loaded from storage. Nothing is validated until [`verify_password`].
    pub fn from_stored(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// Never print the digest itself.
impl fmt::Debug for HashedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedCredential(<redacted>)")
    }
}

pub fn hash_password(plain: &str) -> AuthResult<HashedCredential> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AuthError::Hashing(e.to_string())
        })?
        .to_string();
    Ok(HashedCredential(hash))
}

/// `Ok(false)` for a wrong password; `Err(CorruptCredential)` only when the
/// stored digest cannot be parsed or uses parameters argon2 rejects.
pub fn verify_password(plain: &str, stored: &HashedCredential) -> AuthResult<bool> {
    let parsed = PasswordHash::new(stored.as_str()).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        AuthError::CorruptCredential
    })?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => {
            error!(error = %e, "argon2 verify error");
            Err(AuthError::CorruptCredential)
        }
    }
}

/// Runs the hash on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password_blocking(plain: String) -> AuthResult<HashedCredential> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

pub async fn verify_password_blocking(plain: String, stored: HashedCredential) -> AuthResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &stored))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_password_hashes_differently_but_both_verify() {
        let first = hash_password("secret123").unwrap();
        let second = hash_password("secret123").unwrap();
        assert_ne!(first, second);
        assert!(verify_password("secret123", &first).unwrap());
        assert!(verify_password("secret123", &second).unwrap());
    }

    #[test]
    fn digest_is_argon2id_and_not_plaintext() {
        let hash = hash_password("secret123").unwrap();
        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(!hash.as_str().contains("secret123"));
        assert!(!format!("{hash:?}").contains("argon2"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", &HashedCredential::from_stored("not-a-valid-hash"))
            .unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredential));
    }

    #[tokio::test]
    async fn blocking_wrappers_agree_with_sync_versions() {
        let hash = hash_password_blocking("pa55word!".into()).await.unwrap();
        assert!(verify_password_blocking("pa55word!".into(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password_blocking("nope-nope".into(), hash).await.unwrap());
    }
}
