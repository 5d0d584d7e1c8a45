use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub server_port: u16,
    pub storage_root: PathBuf,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub db_statement_timeout: Duration,
    pub tx_warn_after: Duration,
    pub rate_limit_per_minute: u32,
    pub cors_origins: Vec<String>,
    /// Honour `X-Forwarded-For` for the client address. Only enable behind a proxy that sets it.
    pub trust_proxy: bool,
}

impl Config {
    /// Load configuration from environment variables, applying defaults where appropriate.
    ///
    /// # Errors
    /// Returns an error if mandatory variables (`DATABASE_URL`, `JWT_SECRET`,
    /// `JWT_REFRESH_SECRET`) are missing, if a TTL cannot be parsed, or if the
    /// two signing secrets are identical.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_refresh_secret =
            std::env::var("JWT_REFRESH_SECRET").context("JWT_REFRESH_SECRET must be set")?;

        let access_token_ttl = match std::env::var("JWT_EXPIRE") {
            Ok(raw) => parse_ttl(&raw).context("JWT_EXPIRE is not a valid duration")?,
            Err(_) => Duration::from_secs(15 * 60),
        };
        let refresh_token_ttl = match std::env::var("JWT_REFRESH_EXPIRE") {
            Ok(raw) => parse_ttl(&raw).context("JWT_REFRESH_EXPIRE is not a valid duration")?,
            Err(_) => Duration::from_secs(7 * 24 * 60 * 60),
        };

        let server_port = env_or("SERVER_PORT", 8080);
        let storage_root = std::env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let db_max_connections = env_or("DB_MAX_CONNECTIONS", 20);
        let db_acquire_timeout = Duration::from_millis(env_or("DB_ACQUIRE_TIMEOUT_MS", 2_000));
        let db_statement_timeout =
            Duration::from_millis(env_or("DB_STATEMENT_TIMEOUT_MS", 10_000));
        let tx_warn_after = Duration::from_millis(env_or("TX_WARN_AFTER_MS", 5_000));
        let rate_limit_per_minute = env_or("RATE_LIMIT_PER_MINUTE", 60);
        let trust_proxy = env_or("TRUST_PROXY", false);
        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            database_url,
            jwt_secret,
            jwt_refresh_secret,
            access_token_ttl,
            refresh_token_ttl,
            server_port,
            storage_root,
            db_max_connections,
            db_acquire_timeout,
            db_statement_timeout,
            tx_warn_after,
            rate_limit_per_minute,
            cors_origins,
            trust_proxy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that cannot be expressed by the field types.
    ///
    /// # Errors
    /// Returns an error if a signing secret is empty or both secrets are equal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() || self.jwt_refresh_secret.is_empty() {
            bail!("JWT secrets must not be empty");
        }
        if self.jwt_secret == self.jwt_refresh_secret {
            bail!("JWT_SECRET and JWT_REFRESH_SECRET must differ");
        }
        if self.access_token_ttl >= self.refresh_token_ttl {
            bail!("access token lifetime must be shorter than refresh token lifetime");
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a lifetime such as `900`, `15m`, `12h` or `7d`. A bare number is seconds.
///
/// # Errors
/// Returns an error for an empty string, an unknown unit or a zero duration.
pub fn parse_ttl(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .with_context(|| format!("'{raw}' has no numeric amount"))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => bail!("unknown duration unit '{other}'"),
    };
    if amount == 0 {
        bail!("duration must be positive");
    }
    let secs = amount
        .checked_mul(multiplier)
        .context("duration overflows")?;
    Ok(Duration::from_secs(secs))
}
