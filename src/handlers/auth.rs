use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode};
use uuid::Uuid;

use super::{AppJson, validated};
use crate::{
    AppState,
    errors::{AppError, AppResult},
    models::{
        AccessTokenResponse, ClientMeta, LoginRequest, RefreshRequest, RegisterRequest, Role,
        TokenResponse, User, UserResponse, UserStatus,
    },
    utils::{hash_password, verify_password},
};

const USER_COLUMNS: &str =
    "id, email, password_hash, full_name, role, status, email_verified, created_at";

/// Register a new reader account.
///
/// # Errors
/// Returns validation errors (including a taken email), hashing errors, or database errors.
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    validated(&payload)?;

    let email = payload.email.trim().to_lowercase();
    let password_hash = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, email, password_hash, full_name, role, status) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (email) DO NOTHING \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(payload.full_name.trim())
    .bind(Role::Reader)
    .bind(UserStatus::Active)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Validation("email is already registered".into()))?;

    tracing::info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
        }),
    ))
}

/// Authenticate a user and return an access/refresh token pair.
///
/// # Errors
/// Returns validation, rate-limit, invalid credentials, forbidden (suspended) or database errors.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientMeta>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let key = client.ip.unwrap_or_else(|| "unknown".to_string());
    if state.login_rate_limiter.check_key(&key).is_err() {
        tracing::warn!(client = %key, "login attempts exhausted");
        return Err(AppError::RateLimited);
    }

    validated(&payload)?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&state.db)
    .await?
    .filter(|u| u.status != UserStatus::Deleted)
    .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }
    if user.status == UserStatus::Suspended {
        return Err(AppError::Forbidden);
    }

    let access = state.tokens.issue_access_token(user.id, user.role)?;
    let refresh = state.tokens.issue_refresh_token(user.id)?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            access_token: access,
            refresh_token: refresh,
        }),
    ))
}

/// Exchange a refresh token for a new access token. The account must still be active.
///
/// # Errors
/// Returns unauthorized for a bad token or an account that is no longer active.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    AppJson(body): AppJson<RefreshRequest>,
) -> AppResult<Json<AccessTokenResponse>> {
    let claims = state
        .tokens
        .verify_refresh_token(&body.refresh_token)
        .ok_or(AppError::Unauthorized)?;

    let account = sqlx::query_as::<_, (Role, UserStatus)>("SELECT role, status FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.db)
        .await?;

    let role = match account {
        Some((role, UserStatus::Active)) => role,
        Some((_, status)) => {
            tracing::info!(user_id = %claims.sub, ?status, "refresh refused for inactive account");
            return Err(AppError::Unauthorized);
        }
        None => return Err(AppError::Unauthorized),
    };

    let access_token = state.tokens.issue_access_token(claims.sub, role)?;
    Ok(Json(AccessTokenResponse { access_token }))
}
