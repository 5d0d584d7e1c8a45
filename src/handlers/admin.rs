use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use crate::{
    AppState,
    download::DOWNLOAD_EVENT,
    errors::{AppError, AppResult},
    models::{AnalyticsSummary, CatalogTotals, EventCount, TopBook, UserContext},
};

/// Usage analytics for administrators.
///
/// # Errors
/// Returns forbidden for non-admin callers, otherwise database errors.
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> AppResult<Json<AnalyticsSummary>> {
    if !user.role.is_admin() {
        return Err(AppError::Forbidden);
    }

    let totals = sqlx::query_as::<_, CatalogTotals>(
        "SELECT \
            (SELECT COUNT(*) FROM books WHERE status = 'active') AS active_books, \
            (SELECT COALESCE(SUM(view_count), 0)::bigint FROM books WHERE status <> 'deleted') AS total_views, \
            (SELECT COALESCE(SUM(download_count), 0)::bigint FROM books WHERE status <> 'deleted') AS total_downloads, \
            (SELECT COUNT(*) FROM users WHERE status <> 'deleted') AS registered_users",
    )
    .fetch_one(&state.db)
    .await?;

    let downloads_last_30_days: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM download_history WHERE downloaded_at > now() - interval '30 days'",
    )
    .fetch_one(&state.db)
    .await?;

    let top_books = sqlx::query_as::<_, TopBook>(
        "SELECT id, title, download_count, view_count FROM books \
         WHERE status <> 'deleted' \
         ORDER BY download_count DESC, id LIMIT 10",
    )
    .fetch_all(&state.db)
    .await?;

    let events = sqlx::query_as::<_, EventCount>(
        "SELECT event_type, COUNT(*) AS count FROM analytics_events \
         GROUP BY event_type ORDER BY count DESC",
    )
    .fetch_all(&state.db)
    .await?;

    tracing::debug!(
        admin = %user.user_id,
        downloads = events.iter().find(|e| e.event_type == DOWNLOAD_EVENT).map_or(0, |e| e.count),
        "analytics requested"
    );

    Ok(Json(AnalyticsSummary {
        totals,
        downloads_last_30_days,
        top_books,
        events,
    }))
}
