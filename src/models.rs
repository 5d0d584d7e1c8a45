use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "book_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    Inactive,
    Deleted,
}

impl DocumentStatus {
    /// Parse a status name as sent by clients; unknown names yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity carried by a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Uuid,
    pub role: Role,
}

/// Who is asking. Endpoints with optional authentication receive this
/// instead of a nullable user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Authenticated(UserContext),
    Anonymous,
}

impl Caller {
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Caller::Authenticated(ctx) => Some(ctx.user_id),
            Caller::Anonymous => None,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Authenticated(ctx) if ctx.role.is_admin())
    }
}

/// Request metadata recorded alongside downloads and analytics events.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

// ───── Catalog rows ─────

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct BookSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub pages: Option<i32>,
    pub file_format: String,
    pub cover_image: Option<String>,
    pub download_count: i64,
    pub view_count: i64,
    pub rating_avg: f64,
    pub rating_count: i32,
    pub created_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub author_id: Option<i32>,
    pub language_id: Option<i32>,
    pub author_name: Option<String>,
    pub language_name: Option<String>,
    pub language_code: Option<String>,
    pub category_ids: Vec<i32>,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: i32,
    pub name_uz: String,
    pub name_ru: Option<String>,
    pub name_en: Option<String>,
    pub slug: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct BookDetail {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub pages: Option<i32>,
    pub file_format: String,
    pub cover_image: Option<String>,
    pub download_count: i64,
    pub view_count: i64,
    pub rating_avg: f64,
    pub rating_count: i32,
    pub created_at: DateTime<Utc>,
    pub author_id: Option<i32>,
    pub author_name: Option<String>,
    pub author_bio: Option<String>,
    pub language_id: Option<i32>,
    pub language_name: Option<String>,
    pub language_code: Option<String>,
    pub categories: Json<Vec<CategoryRef>>,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct LanguageRef {
    pub id: i32,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResources {
    pub languages: Vec<LanguageRef>,
    pub categories: Vec<CategoryRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_books: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct BookListResponse {
    pub books: Vec<BookSummary>,
    pub pagination: Pagination,
}

// ───── Library and reviews ─────

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct LibraryEntry {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub rating_avg: f64,
    pub rating_count: i32,
    pub author_name: Option<String>,
    pub language_name: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToLibraryRequest {
    pub book_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LibraryAddResponse {
    pub message: String,
    pub added: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct ReviewView {
    pub id: Uuid,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub is_own_review: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating: i16,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ───── Credentials ─────

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
}

// ───── Analytics ─────

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct CatalogTotals {
    pub active_books: i64,
    pub total_views: i64,
    pub total_downloads: i64,
    pub registered_users: i64,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct TopBook {
    pub id: Uuid,
    pub title: String,
    pub download_count: i64,
    pub view_count: i64,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct EventCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub totals: CatalogTotals,
    pub downloads_last_30_days: i64,
    pub top_books: Vec<TopBook>,
    pub events: Vec<EventCount>,
}
