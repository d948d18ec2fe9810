use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, SignupRequest},
        jwt::{AuthUser, JwtKeys},
    },
    error::{AuthError, AuthResult},
    state::AppState,
    upstream::with_timeout,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AuthResult<(StatusCode, Json<AuthResponse>)> {
    let user = state
        .local_auth
        .signup(&payload.name, &payload.email, &payload.password)
        .await?;

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let user = state
        .local_auth
        .login(&payload.email, &payload.password)
        .await?;

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    Ok(Json(AuthResponse {
        user: user.into(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token)?;

    let user = load_user(&state, claims.sub).await?;
    let tokens = keys.issue_pair(user.id)?;
    Ok(Json(AuthResponse {
        user: user.into(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<Json<PublicUser>> {
    let user = load_user(&state, user_id).await?;
    Ok(Json(user.into()))
}

async fn load_user(
    state: &AppState,
    user_id: uuid::Uuid,
) -> AuthResult<crate::auth::repo_types::User> {
    with_timeout("user store", state.config.store_timeout(), async {
        state.users.find_by_id(user_id).await.map_err(AuthError::from)
    })
    .await?
    .ok_or_else(|| {
        error!(user_id = %user_id, "token subject not found");
        AuthError::Unauthorized("User not found".into())
    })
}
