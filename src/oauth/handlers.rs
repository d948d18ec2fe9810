use axum::{
    extract::{FromRef, Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    auth::{dto::PublicUser, jwt::JwtKeys},
    error::{AuthError, AuthResult},
    oauth::resolver::CallbackContext,
    state::AppState,
};

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/login/google", get(google_login))
        .route("/login/callback", get(callback))
}

/// Query string Google appends to the redirect URI.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub user: PublicUser,
    pub created: bool,
    pub access_token: String,
    pub refresh_token: String,
}

#[instrument(skip(state))]
pub async fn google_login(State(state): State<AppState>) -> AuthResult<Redirect> {
    let url = state.resolver.authorize_url().await?;
    Ok(Redirect::to(&url))
}

#[instrument(skip(state, query))]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> AuthResult<Json<CallbackResponse>> {
    if let Some(err) = query.error {
        warn!(provider_error = %err, "provider returned error on callback");
        return Err(AuthError::rejected(format!("provider denied login: {err}")));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(AuthError::rejected("missing code or state"));
    };

    let identity = state
        .resolver
        .resolve(CallbackContext {
            code,
            state: oauth_state,
        })
        .await?;
    let (user, created) = state.oauth_login.login_with_identity(&identity).await?;

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    Ok(Json(CallbackResponse {
        user: user.into(),
        created,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}
