use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    AppState,
    catalog::{self, CatalogQuery, ListBooksQuery},
    download::{self, DownloadRequest},
    errors::{AppError, AppResult},
    models::{
        BookDetail, BookListResponse, Caller, CatalogResources, CategoryRef, ClientMeta,
        DocumentStatus, LanguageRef, UserContext,
    },
};

/// List catalog documents with filters, sorting and pagination. Admin
/// callers may widen the status filter.
///
/// # Errors
/// Returns database errors.
pub async fn list_books(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListBooksQuery>,
) -> AppResult<Json<BookListResponse>> {
    let query = CatalogQuery::build(&params, &caller);
    let page = catalog::fetch_page(&state.db, &query).await?;
    Ok(Json(page))
}

/// Get a single active document and count the view.
///
/// # Errors
/// Returns not found or database errors.
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BookDetail>> {
    let book = sqlx::query_as::<_, BookDetail>(
        "SELECT b.id, b.title, b.description, b.isbn, b.publisher, b.publish_year, b.pages, \
                b.file_format, b.cover_image, b.download_count, b.view_count, \
                b.rating_avg, b.rating_count, b.created_at, \
                b.author_id, a.name AS author_name, a.bio AS author_bio, \
                b.language_id, l.name AS language_name, l.code AS language_code, \
                COALESCE(( \
                    SELECT json_agg(json_build_object( \
                        'id', c.id, 'name_uz', c.name_uz, 'name_ru', c.name_ru, \
                        'name_en', c.name_en, 'slug', c.slug) ORDER BY c.id) \
                    FROM book_categories bc JOIN categories c ON c.id = bc.category_id \
                    WHERE bc.book_id = b.id \
                ), '[]'::json) AS categories \
         FROM books b \
         LEFT JOIN authors a ON b.author_id = a.id \
         LEFT JOIN languages l ON b.language_id = l.id \
         WHERE b.id = $1 AND b.status = $2",
    )
    .bind(id)
    .bind(DocumentStatus::Active)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)?;

    sqlx::query("UPDATE books SET view_count = view_count + 1 WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    Ok(Json(book))
}

/// Languages and categories for building filter controls.
///
/// # Errors
/// Returns database errors.
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<CatalogResources>> {
    let languages = sqlx::query_as::<_, LanguageRef>("SELECT id, name, code FROM languages ORDER BY name")
        .fetch_all(&state.db)
        .await?;

    let categories = sqlx::query_as::<_, CategoryRef>(
        "SELECT id, name_uz, name_ru, name_en, slug FROM categories ORDER BY name_uz",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(CatalogResources {
        languages,
        categories,
    }))
}

/// Record a download and stream the file as an attachment.
///
/// # Errors
/// Returns not found (document or file), transaction or I/O errors.
pub async fn download_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<UserContext>,
    Extension(client): Extension<ClientMeta>,
) -> AppResult<Response> {
    let request = DownloadRequest {
        document_id: id,
        user_id: user.user_id,
        client,
    };
    let ticket = download::download_document(
        &state.db,
        &state.config.storage_root,
        state.config.tx_warn_after,
        &request,
    )
    .await?;

    let file = tokio::fs::File::open(&ticket.path).await.map_err(|e| {
        tracing::warn!(path = %ticket.path.display(), error = %e, "file vanished before streaming");
        AppError::FileMissing
    })?;

    let disposition = HeaderValue::from_str(&download::content_disposition(&ticket.filename))
        .map_err(|e| AppError::Anyhow(e.into()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(ticket.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
