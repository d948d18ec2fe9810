use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::auth::repo::{MemoryUserStore, PgUserStore, UserStore};
use crate::auth::services::LocalAuthService;
use crate::config::AppConfig;
use crate::oauth::resolver::{GoogleResolver, IdentityResolver, StubResolver};
use crate::oauth::services::OAuthLoginService;
use crate::oauth::state_store::PgOAuthStateStore;

/// Process-wide dependencies, built once in `main` and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub local_auth: LocalAuthService,
    pub oauth_login: OAuthLoginService,
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(config.store_timeout())
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        let resolver: Arc<dyn IdentityResolver> = if config.test_mode {
            warn!("AUTH_TEST_MODE enabled: OAuth callback uses a stub identity");
            Arc::new(StubResolver::default())
        } else {
            let states = Arc::new(PgOAuthStateStore::new(db.clone()));
            Arc::new(
                GoogleResolver::new(&config.google, states, config.provider_timeout())
                    .context("build google oauth client")?,
            )
        };

        info!(production = config.is_production(), "app state initialized");
        let mut state = Self::from_parts(config, users, resolver);
        state.db = Some(db);
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let local_auth = LocalAuthService::new(users.clone(), config.store_timeout());
        let oauth_login = OAuthLoginService::new(users.clone(), config.store_timeout());
        Self {
            config,
            users,
            resolver,
            local_auth,
            oauth_login,
            db: None,
        }
    }

    /// In-memory store plus the stub resolver; for tests and local experiments.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::from_parts(
            Arc::new(config),
            Arc::new(MemoryUserStore::new()),
            Arc::new(StubResolver::default()),
        )
    }

    /// Closes the database pool, if any.
    pub async fn shutdown(&self) {
        if let Some(db) = &self.db {
            db.close().await;
            info!("database pool closed");
        }
    }
}
