//! # Identity resolution
//!
//! Turns the artifacts delivered to `/login/callback` into a provider-verified
//! identity.
//!
//! - [`GoogleResolver`] runs the Authorization Code flow with PKCE against
//!   Google. [`authorize_url`](IdentityResolver::authorize_url) records the
//!   CSRF state and PKCE verifier; [`resolve`](IdentityResolver::resolve)
//!   consumes them, exchanges the code for a token and reads the userinfo
//!   endpoint. Identities whose email Google has not verified are rejected.
//! - [`StubResolver`] returns a fixed identity. It is only wired in when
//!   `AUTH_TEST_MODE` is set outside production.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::error::{AuthError, AuthResult};
use crate::oauth::state_store::{OAuthStateStore, PendingState};
use crate::upstream::{with_timeout, with_timeout_retry_once};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const USERINFO_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Query parameters Google sends back to the redirect URI.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub code: String,
    pub state: String,
}

/// A provider-verified identity with a trimmed, lower-cased email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// URL to send the browser to for consent.
    async fn authorize_url(&self) -> AuthResult<String>;

    async fn resolve(&self, ctx: CallbackContext) -> AuthResult<ExternalIdentity>;
}

/// Google userinfo (v2) response.
#[derive(Debug, Deserialize)]
pub(crate) struct GoogleUserInfo {
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

pub(crate) fn identity_from_userinfo(info: GoogleUserInfo) -> AuthResult<ExternalIdentity> {
    let email = info
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AuthError::rejected("provider returned no email; is the email scope granted?"))?;

    if !info.verified_email {
        warn!(email = %email, "google email not verified");
        return Err(AuthError::rejected("email address is not verified by the provider"));
    }

    let display_name = info
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    Ok(ExternalIdentity {
        email,
        display_name,
        picture: info.picture.filter(|p| !p.is_empty()),
    })
}

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct GoogleResolver {
    client: ConfiguredClient,
    http: reqwest::Client,
    states: Arc<dyn OAuthStateStore>,
    timeout: Duration,
}

impl GoogleResolver {
    pub fn new(
        config: &GoogleConfig,
        states: Arc<dyn OAuthStateStore>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
            .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone())?);

        // token endpoint responses must not be followed as redirects
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            http,
            states,
            timeout,
        })
    }

    async fn exchange_code(&self, code: String, verifier: String) -> AuthResult<String> {
        let token = with_timeout("google token endpoint", self.timeout, async {
            self.client
                .exchange_code(AuthorizationCode::new(code))
                .set_pkce_verifier(PkceCodeVerifier::new(verifier))
                .request_async(&self.http)
                .await
                .map_err(|e| match e {
                    RequestTokenError::ServerResponse(resp) => {
                        warn!(error = ?resp.error(), "google rejected authorization code");
                        AuthError::rejected("authorization code rejected by provider")
                    }
                    other => AuthError::provider(format!("token exchange failed: {other}")),
                })
        })
        .await?;
        Ok(token.access_token().secret().clone())
    }

    async fn fetch_userinfo(&self, access_token: &str) -> AuthResult<GoogleUserInfo> {
        with_timeout_retry_once(
            "google userinfo",
            self.timeout,
            USERINFO_RETRY_BACKOFF,
            || async move {
                let resp = self
                    .http
                    .get(GOOGLE_USERINFO_URL)
                    .bearer_auth(access_token)
                    .send()
                    .await
                    .map_err(|e| AuthError::provider(format!("userinfo request failed: {e}")))?;
                if !resp.status().is_success() {
                    return Err(AuthError::provider(format!(
                        "userinfo returned {}",
                        resp.status()
                    )));
                }
                resp.json::<GoogleUserInfo>()
                    .await
                    .map_err(|e| AuthError::provider(format!("userinfo parse failed: {e}")))
            },
        )
        .await
    }
}

#[async_trait]
impl IdentityResolver for GoogleResolver {
    async fn authorize_url(&self) -> AuthResult<String> {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        let pending = PendingState::new(csrf_state.secret().clone(), pkce_verifier.secret().clone());
        with_timeout("oauth state store", self.timeout, async {
            self.states.put(pending).await.map_err(AuthError::from)
        })
        .await?;

        debug!("google authorization url issued");
        Ok(auth_url.to_string())
    }

    async fn resolve(&self, ctx: CallbackContext) -> AuthResult<ExternalIdentity> {
        let pending = with_timeout("oauth state store", self.timeout, async {
            self.states.take(&ctx.state).await.map_err(AuthError::from)
        })
        .await?
        .ok_or_else(|| {
            warn!("unknown or expired oauth state");
            AuthError::rejected("invalid or expired OAuth state")
        })?;

        let access_token = self.exchange_code(ctx.code, pending.pkce_verifier).await?;
        let info = self.fetch_userinfo(&access_token).await?;
        let identity = identity_from_userinfo(info)?;
        info!(email = %identity.email, "google identity resolved");
        Ok(identity)
    }
}

/// Fixed identity for local development and tests. Never constructed in production.
#[derive(Debug, Clone)]
pub struct StubResolver {
    identity: ExternalIdentity,
}

impl StubResolver {
    pub fn new(identity: ExternalIdentity) -> Self {
        Self { identity }
    }
}

impl Default for StubResolver {
    fn default() -> Self {
        Self::new(ExternalIdentity {
            email: "test@example.com".into(),
            display_name: "TestUser".into(),
            picture: None,
        })
    }
}

#[async_trait]
impl IdentityResolver for StubResolver {
    async fn authorize_url(&self) -> AuthResult<String> {
        Ok("/login/callback?code=stub&state=stub".into())
    }

    async fn resolve(&self, ctx: CallbackContext) -> AuthResult<ExternalIdentity> {
        if ctx.code.is_empty() {
            return Err(AuthError::rejected("missing authorization code"));
        }
        Ok(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::state_store::MemoryOAuthStateStore;

    fn userinfo(email: Option<&str>, verified: bool, name: Option<&str>) -> GoogleUserInfo {
        GoogleUserInfo {
            email: email.map(str::to_string),
            verified_email: verified,
            name: name.map(str::to_string),
            picture: None,
        }
    }

    fn google_config() -> GoogleConfig {
        GoogleConfig {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            redirect_url: "http://localhost:8080/login/callback".into(),
        }
    }

    #[test]
    fn verified_identity_is_accepted_and_normalized() {
        let identity =
            identity_from_userinfo(userinfo(Some("Alice@Gmail.com"), true, Some("Alice"))).unwrap();
        assert_eq!(identity.email, "alice@gmail.com");
        assert_eq!(identity.display_name, "Alice");
    }

    #[test]
    fn unverified_email_is_rejected() {
        let err = identity_from_userinfo(userinfo(Some("a@x.com"), false, Some("A"))).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_email_is_rejected() {
        assert!(identity_from_userinfo(userinfo(None, true, Some("A"))).is_err());
        assert!(identity_from_userinfo(userinfo(Some("  "), true, Some("A"))).is_err());
    }

    #[test]
    fn missing_name_falls_back_to_local_part() {
        let identity = identity_from_userinfo(userinfo(Some("bob@x.com"), true, None)).unwrap();
        assert_eq!(identity.display_name, "bob");
    }

    #[test]
    fn unverified_flag_defaults_to_false() {
        let info: GoogleUserInfo = serde_json::from_str(r#"{"email":"a@x.com","name":"A"}"#).unwrap();
        assert!(identity_from_userinfo(info).is_err());
    }

    #[tokio::test]
    async fn authorize_url_requests_scopes_and_records_state() {
        let states = Arc::new(MemoryOAuthStateStore::new());
        let resolver =
            GoogleResolver::new(&google_config(), states.clone(), Duration::from_secs(1)).unwrap();

        let url = resolver.authorize_url().await.unwrap();
        assert!(url.starts_with(GOOGLE_AUTH_URL));

        let parsed = reqwest::Url::parse(&url).unwrap();
        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        assert_eq!(param("scope").as_deref(), Some("openid email profile"));
        assert_eq!(param("code_challenge_method").as_deref(), Some("S256"));
        let state = param("state").unwrap();
        assert!(states.take(&state).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resolve_rejects_unknown_state_before_contacting_google() {
        let states = Arc::new(MemoryOAuthStateStore::new());
        let resolver = GoogleResolver::new(&google_config(), states, Duration::from_secs(1)).unwrap();

        let err = resolver
            .resolve(CallbackContext {
                code: "code".into(),
                state: "forged".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stub_returns_fixed_identity() {
        let stub = StubResolver::default();
        let identity = stub
            .resolve(CallbackContext {
                code: "stub".into(),
                state: "stub".into(),
            })
            .await
            .unwrap();
        assert_eq!(identity.email, "test@example.com");
    }
}
