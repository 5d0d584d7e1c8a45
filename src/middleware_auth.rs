use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};

use crate::{
    AppState,
    errors::AppError,
    models::{Caller, ClientMeta, UserContext},
};

/// Records client IP and user agent for every request and applies the
/// per-client rate limit. The IP is the socket peer unless `trust_proxy` is
/// set, in which case the first `X-Forwarded-For` entry wins.
///
/// # Errors
/// Returns `RateLimited` when the client's quota is exhausted.
pub async fn client_context(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let forwarded = if state.config.trust_proxy {
        forwarded_for(req.headers())
    } else {
        None
    };
    let meta = ClientMeta {
        ip: forwarded.or(peer),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let key = meta.ip.clone().unwrap_or_else(|| "unknown".to_string());
    if state.rate_limiter.check_key(&key).is_err() {
        tracing::warn!(client = %key, "rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    req.extensions_mut().insert(meta);
    Ok(next.run(req).await)
}

/// Authentication middleware validating access tokens. Inserts the caller's
/// [`UserContext`] into request extensions.
///
/// # Errors
/// Returns unauthorized if the token is missing, malformed, expired or not an access token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = authenticate(&state, req.headers()).ok_or(AppError::Unauthorized)?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Like [`auth_middleware`] but never rejects: inserts a [`Caller`] that is
/// `Anonymous` when no valid token is present.
pub async fn optional_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let caller = authenticate(&state, req.headers()).map_or(Caller::Anonymous, Caller::Authenticated);
    req.extensions_mut().insert(caller);
    next.run(req).await
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Option<UserContext> {
    let token = bearer_token(headers)?;
    state
        .tokens
        .verify_access_token(token)
        .map(|claims| claims.user_context())
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
