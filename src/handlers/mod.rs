pub mod admin;
pub mod auth;
pub mod books;
pub mod collection;

use axum::extract::FromRequest;
use validator::Validate;

use crate::errors::{AppError, AppResult};

/// JSON request body whose parse failures are reported as
/// [`AppError::Validation`] instead of axum's plain-text rejection.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Health check endpoint.
#[must_use]
#[allow(clippy::unused_async)]
pub async fn health_check() -> &'static str {
    "OK"
}

fn validated<T: Validate>(payload: &T) -> AppResult<()> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}
