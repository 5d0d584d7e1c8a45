//! The download pipeline: the only writer of `download_history` and
//! `books.download_count`.

use std::{
    fmt::Write,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::TrackedTransaction,
    errors::{AppError, AppResult},
    models::{ClientMeta, DocumentStatus},
};

pub const DOWNLOAD_EVENT: &str = "download";

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub client: ClientMeta,
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct DownloadTarget {
    title: String,
    file_path: String,
    file_format: String,
}

/// Where to stream the file from, and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: &'static str,
}

/// Record a download and resolve the file to stream.
///
/// The history row, counter increment and analytics event commit together or
/// not at all. A missing document aborts with [`AppError::NotFound`] before
/// any write; a missing file after commit is [`AppError::FileMissing`].
///
/// # Errors
/// `NotFound`, `FileMissing`, or `Transaction` for storage failures.
#[tracing::instrument(skip(pool, storage_root, request), fields(document_id = %request.document_id, user_id = %request.user_id))]
pub async fn download_document(
    pool: &PgPool,
    storage_root: &Path,
    tx_budget: Duration,
    request: &DownloadRequest,
) -> AppResult<DownloadTicket> {
    let mut tx = TrackedTransaction::begin(pool, "download", tx_budget)
        .await
        .map_err(AppError::Transaction)?;

    let target = match record_download(&mut tx, request).await {
        Ok(Some(target)) => {
            tx.commit().await.map_err(AppError::Transaction)?;
            target
        }
        Ok(None) => {
            tx.rollback().await.map_err(AppError::Transaction)?;
            return Err(AppError::NotFound);
        }
        Err(e) => {
            let failed_at = tx.last_statement();
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed download also failed");
            }
            warn!(error = %e, statement = failed_at, "download transaction rolled back");
            return Err(AppError::Transaction(e));
        }
    };

    info!("download recorded");

    let Some(path) = resolve_file(storage_root, &target.file_path).await else {
        warn!(file_path = %target.file_path, "catalog references a file that is not in storage");
        return Err(AppError::FileMissing);
    };

    Ok(DownloadTicket {
        path,
        filename: download_filename(&target.title, &target.file_format),
        content_type: content_type_for(&target.file_format),
    })
}

async fn record_download(
    tx: &mut TrackedTransaction,
    request: &DownloadRequest,
) -> Result<Option<DownloadTarget>, sqlx::Error> {
    let target = sqlx::query_as::<_, DownloadTarget>(
        "SELECT title, file_path, file_format FROM books WHERE id = $1 AND status = $2",
    )
    .bind(request.document_id)
    .bind(DocumentStatus::Active)
    .fetch_optional(tx.conn("select book"))
    .await?;

    let Some(target) = target else {
        return Ok(None);
    };

    sqlx::query("INSERT INTO download_history (user_id, book_id, ip_address) VALUES ($1, $2, $3)")
        .bind(request.user_id)
        .bind(request.document_id)
        .bind(request.client.ip.as_deref())
        .execute(tx.conn("insert download_history"))
        .await?;

    sqlx::query("UPDATE books SET download_count = download_count + 1 WHERE id = $1")
        .bind(request.document_id)
        .execute(tx.conn("increment download_count"))
        .await?;

    sqlx::query(
        "INSERT INTO analytics_events (event_type, user_id, book_id, ip_address, user_agent) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(DOWNLOAD_EVENT)
    .bind(request.user_id)
    .bind(request.document_id)
    .bind(request.client.ip.as_deref())
    .bind(request.client.user_agent.as_deref())
    .execute(tx.conn("insert analytics_events"))
    .await?;

    Ok(Some(target))
}

/// Join a stored relative path onto the storage root. Absolute paths and
/// paths with `..` never resolve.
#[must_use]
pub fn storage_path(storage_root: &Path, stored: &str) -> Option<PathBuf> {
    let relative = Path::new(stored.trim_start_matches("./"));
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !stored.is_empty()).then(|| storage_root.join(relative))
}

/// Resolve and confirm the file exists as a regular file.
pub async fn resolve_file(storage_root: &Path, stored: &str) -> Option<PathBuf> {
    let path = storage_path(storage_root, stored)?;
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        _ => None,
    }
}

#[must_use]
pub fn download_filename(title: &str, format: &str) -> String {
    let clean: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '"' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let clean = clean.trim();
    let stem = if clean.is_empty() { "document" } else { clean };
    format!("{stem}.{}", format.trim().to_ascii_lowercase())
}

#[must_use]
pub fn content_type_for(format: &str) -> &'static str {
    match format.trim().to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "djvu" => "image/vnd.djvu",
        "txt" => "text/plain; charset=utf-8",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 UTF-8 name.
#[must_use]
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
