//! Personal library and reviews.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::{AppJson, validated};
use crate::{
    AppState,
    errors::{AppError, AppResult},
    models::{
        AddToLibraryRequest, Caller, DocumentStatus, LibraryAddResponse, LibraryEntry,
        MessageResponse, ReviewRequest, ReviewView, UserContext,
    },
};

async fn ensure_active(state: &AppState, book_id: Uuid) -> AppResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM books WHERE id = $1 AND status = $2")
        .bind(book_id)
        .bind(DocumentStatus::Active)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(())
}

/// Add a book to the caller's library. Adding it again is a no-op.
///
/// # Errors
/// Returns not found or database errors.
pub async fn add_to_library(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    AppJson(body): AppJson<AddToLibraryRequest>,
) -> AppResult<Json<LibraryAddResponse>> {
    ensure_active(&state, body.book_id).await?;

    let inserted = sqlx::query(
        "INSERT INTO user_library (user_id, book_id) VALUES ($1, $2) \
         ON CONFLICT (user_id, book_id) DO NOTHING",
    )
    .bind(user.user_id)
    .bind(body.book_id)
    .execute(&state.db)
    .await?
    .rows_affected();

    let added = inserted > 0;
    Ok(Json(LibraryAddResponse {
        message: if added {
            "book added to library".into()
        } else {
            "book already in library".into()
        },
        added,
    }))
}

/// The caller's library, newest additions first.
///
/// # Errors
/// Returns database errors.
pub async fn list_library(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> AppResult<Json<Vec<LibraryEntry>>> {
    let entries = sqlx::query_as::<_, LibraryEntry>(
        "SELECT b.id, b.title, b.description, b.cover_image, b.rating_avg, b.rating_count, \
                a.name AS author_name, l.name AS language_name, ul.added_at \
         FROM user_library ul \
         JOIN books b ON ul.book_id = b.id \
         LEFT JOIN authors a ON b.author_id = a.id \
         LEFT JOIN languages l ON b.language_id = l.id \
         WHERE ul.user_id = $1 AND b.status = $2 \
         ORDER BY ul.added_at DESC",
    )
    .bind(user.user_id)
    .bind(DocumentStatus::Active)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(entries))
}

/// Active reviews for a book, flagging the caller's own.
///
/// # Errors
/// Returns database errors.
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<ReviewView>>> {
    let reviews = sqlx::query_as::<_, ReviewView>(
        "SELECT r.id, r.rating, r.comment, r.created_at, \
                u.full_name AS user_name, \
                COALESCE(r.user_id = $2, FALSE) AS is_own_review \
         FROM reviews r \
         JOIN users u ON r.user_id = u.id \
         WHERE r.book_id = $1 AND r.status = 'active' \
         ORDER BY r.created_at DESC",
    )
    .bind(id)
    .bind(caller.user_id())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reviews))
}

/// Create or replace the caller's review of a book.
///
/// # Errors
/// Returns validation errors before touching storage, then not found or database errors.
pub async fn add_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<UserContext>,
    AppJson(payload): AppJson<ReviewRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    validated(&payload)?;
    ensure_active(&state, id).await?;

    let comment = payload
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    sqlx::query(
        "INSERT INTO reviews (user_id, book_id, rating, comment) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id, book_id) \
         DO UPDATE SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = now()",
    )
    .bind(user.user_id)
    .bind(id)
    .bind(payload.rating)
    .bind(comment)
    .execute(&state.db)
    .await?;

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "review saved".into(),
        }),
    ))
}
