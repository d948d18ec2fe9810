use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod resolver;
pub mod services;
pub mod state_store;

pub fn router() -> Router<AppState> {
    handlers::oauth_routes()
}
