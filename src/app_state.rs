use crate::{Config, tokens::TokenService, utils::KeyedRateLimiter};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<KeyedRateLimiter>,
    pub login_rate_limiter: Arc<KeyedRateLimiter>,
}

impl AppState {
    #[must_use]
    pub fn new(db: PgPool, config: Config) -> Self {
        Self {
            db,
            tokens: Arc::new(TokenService::from_config(&config)),
            rate_limiter: crate::utils::build_rate_limiter(config.rate_limit_per_minute),
            login_rate_limiter: crate::utils::build_login_rate_limiter(),
            config,
        }
    }
}
