//! Stateless access/refresh tokens.
//!
//! Access and refresh tokens are HS256 JWTs signed with two different
//! secrets, and each carries a `typ` claim. Verification never fails loudly:
//! anything wrong with a token yields `None`.

use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    errors::{AppError, AppResult},
    models::{Role, UserContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    #[must_use]
    pub fn user_context(&self) -> UserContext {
        UserContext {
            user_id: self.sub,
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenService {
    #[must_use]
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            access: SigningKeys::from_secret(access_secret),
            refresh: SigningKeys::from_secret(refresh_secret),
            access_ttl,
            refresh_ttl,
            validation,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.jwt_refresh_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    /// Issue a short-lived token asserting the user's id and role.
    ///
    /// # Errors
    /// Returns an error if the lifetime overflows or encoding fails.
    pub fn issue_access_token(&self, user_id: Uuid, role: Role) -> AppResult<String> {
        let (iat, exp) = window(self.access_ttl)?;
        let claims = AccessClaims {
            sub: user_id,
            role,
            typ: TokenKind::Access,
            iat,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.access.encoding)
            .map_err(|e| AppError::Anyhow(e.into()))
    }

    /// Issue a long-lived token whose only authority is minting access tokens.
    ///
    /// # Errors
    /// Returns an error if the lifetime overflows or encoding fails.
    pub fn issue_refresh_token(&self, user_id: Uuid) -> AppResult<String> {
        let (iat, exp) = window(self.refresh_ttl)?;
        let claims = RefreshClaims {
            sub: user_id,
            typ: TokenKind::Refresh,
            iat,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh.encoding)
            .map_err(|e| AppError::Anyhow(e.into()))
    }

    #[must_use]
    pub fn verify_access_token(&self, token: &str) -> Option<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.access.decoding, &self.validation).ok()?;
        (data.claims.typ == TokenKind::Access).then_some(data.claims)
    }

    #[must_use]
    pub fn verify_refresh_token(&self, token: &str) -> Option<RefreshClaims> {
        let data = decode::<RefreshClaims>(token, &self.refresh.decoding, &self.validation).ok()?;
        (data.claims.typ == TokenKind::Refresh).then_some(data.claims)
    }
}

fn window(ttl: Duration) -> AppResult<(i64, i64)> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| AppError::Anyhow(anyhow!(e)))?;
    let exp = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Anyhow(anyhow!("token lifetime overflows")))?;
    Ok((now.timestamp(), exp.timestamp()))
}
