//! Deadlines for calls that leave the process (user store, identity provider).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AuthError, AuthResult};

/// Runs `fut` under `limit`; an expired deadline becomes [`AuthError::UpstreamTimeout`].
pub async fn with_timeout<T, F>(what: &'static str, limit: Duration, fut: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(upstream = what, timeout_ms = limit.as_millis() as u64, "upstream call timed out");
            Err(AuthError::UpstreamTimeout(what))
        }
    }
}

/// Like [`with_timeout`], but a timed-out attempt is retried once after `backoff`.
/// Only for idempotent provider calls; never for credential checks.
pub async fn with_timeout_retry_once<T, F, Fut>(
    what: &'static str,
    limit: Duration,
    backoff: Duration,
    mut call: F,
) -> AuthResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    match with_timeout(what, limit, call()).await {
        Err(AuthError::UpstreamTimeout(_)) => {
            tokio::time::sleep(backoff).await;
            with_timeout(what, limit, call()).await
        }
        other => other,
    }
}
