//! Catalog query composition.
//!
//! Untrusted list parameters are normalised into a [`CatalogQuery`], which
//! renders a data query and a count query sharing one predicate set. Every
//! client-supplied value travels as a positional bind parameter; the only
//! identifiers placed into the SQL text come from [`SortField::column`].

use serde::Deserialize;
use sqlx::{Arguments, PgPool, postgres::PgArguments};

use crate::{
    errors::AppResult,
    models::{BookListResponse, BookSummary, Caller, DocumentStatus, Pagination},
    utils::escape_like,
};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Raw `GET /books` query string. Everything is kept as text so malformed
/// values degrade to defaults instead of rejecting the request.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBooksQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    Title,
    ViewCount,
    DownloadCount,
    RatingAvg,
    PublishYear,
    Pages,
}

impl SortField {
    /// Map a client sort key onto the allow-list; anything else is `CreatedAt`.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("title") => Self::Title,
            Some("view_count") => Self::ViewCount,
            Some("download_count") => Self::DownloadCount,
            Some("rating_avg") => Self::RatingAvg,
            Some("publish_year") => Self::PublishYear,
            Some("pages") => Self::Pages,
            _ => Self::CreatedAt,
        }
    }

    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "b.created_at",
            Self::Title => "b.title",
            Self::ViewCount => "b.view_count",
            Self::DownloadCount => "b.download_count",
            Self::RatingAvg => "b.rating_avg",
            Self::PublishYear => "b.publish_year",
            Self::Pages => "b.pages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(v) if v.trim().eq_ignore_ascii_case("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Which document statuses a query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    ActiveOnly,
    NotDeleted,
    Exactly(DocumentStatus),
}

impl Visibility {
    /// Non-admin callers always get `ActiveOnly`, whatever they ask for.
    #[must_use]
    pub fn resolve(caller: &Caller, requested: Option<&str>) -> Self {
        if !caller.is_admin() {
            return Self::ActiveOnly;
        }
        match requested.map(str::trim) {
            None | Some("" | "all") => Self::NotDeleted,
            Some(raw) => DocumentStatus::parse(raw).map_or(Self::NotDeleted, Self::Exactly),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Non-positive or unparsable values fall back to defaults; `limit` is capped.
    #[must_use]
    pub fn from_raw(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let limit = limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| *l >= 1)
            .map_or(DEFAULT_LIMIT, |l| l.min(MAX_LIMIT));
        Self { page, limit }
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    #[must_use]
    pub fn pagination(&self, total: i64) -> Pagination {
        let total = total.max(0);
        Pagination {
            current_page: self.page,
            total_pages: (total + self.limit - 1) / self.limit,
            total_books: total,
            limit: self.limit,
        }
    }
}

/// A value destined for a positional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Status(DocumentStatus),
}

const SELECT_COLUMNS: &str = "SELECT b.id, b.title, b.description, b.isbn, b.publisher, \
    b.publish_year, b.pages, b.file_format, b.cover_image, \
    b.download_count, b.view_count, b.rating_avg, b.rating_count, \
    b.created_at, b.status, b.author_id, b.language_id, \
    a.name AS author_name, l.name AS language_name, l.code AS language_code, \
    ARRAY(SELECT bc.category_id FROM book_categories bc \
          WHERE bc.book_id = b.id ORDER BY bc.category_id) AS category_ids";

const FROM_BOOKS: &str = "FROM books b \
    LEFT JOIN authors a ON b.author_id = a.id \
    LEFT JOIN languages l ON b.language_id = l.id";

#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub visibility: Visibility,
    pub sort: SortField,
    pub order: SortOrder,
    pub page: PageRequest,
    predicates: Vec<String>,
    params: Vec<BindValue>,
}

impl CatalogQuery {
    /// Compose the query for `raw` as seen by `caller`.
    #[must_use]
    pub fn build(raw: &ListBooksQuery, caller: &Caller) -> Self {
        let mut query = Self {
            visibility: Visibility::resolve(caller, raw.status.as_deref()),
            sort: SortField::parse(raw.sort_by.as_deref()),
            order: SortOrder::parse(raw.sort_order.as_deref()),
            page: PageRequest::from_raw(raw.page.as_deref(), raw.limit.as_deref()),
            predicates: Vec::new(),
            params: Vec::new(),
        };

        match query.visibility {
            Visibility::ActiveOnly => {
                let n = query.bind(BindValue::Status(DocumentStatus::Active));
                query.predicates.push(format!("b.status = ${n}"));
            }
            Visibility::NotDeleted => {
                let n = query.bind(BindValue::Status(DocumentStatus::Deleted));
                query.predicates.push(format!("b.status <> ${n}"));
            }
            Visibility::Exactly(status) => {
                let n = query.bind(BindValue::Status(status));
                query.predicates.push(format!("b.status = ${n}"));
            }
        }

        if let Some(search) = raw.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let n = query.bind(BindValue::Text(format!("%{}%", escape_like(search))));
            query
                .predicates
                .push(format!("(b.title ILIKE ${n} OR a.name ILIKE ${n})"));
        }

        if let Some(category) = parse_id(raw.category.as_deref()) {
            let n = query.bind(BindValue::Int(category));
            query.predicates.push(format!(
                "EXISTS (SELECT 1 FROM book_categories bc \
                 WHERE bc.book_id = b.id AND bc.category_id = ${n})"
            ));
        }

        if let Some(language) = parse_id(raw.language.as_deref()) {
            let n = query.bind(BindValue::Int(language));
            query.predicates.push(format!("b.language_id = ${n}"));
        }

        if let Some(author) = parse_id(raw.author.as_deref()) {
            let n = query.bind(BindValue::Int(author));
            query.predicates.push(format!("b.author_id = ${n}"));
        }

        query
    }

    fn bind(&mut self, value: BindValue) -> usize {
        self.params.push(value);
        self.params.len()
    }

    /// Values for the shared predicate set, in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[BindValue] {
        &self.params
    }

    #[must_use]
    pub fn where_clause(&self) -> String {
        format!("WHERE {}", self.predicates.join(" AND "))
    }

    #[must_use]
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) {FROM_BOOKS} {}", self.where_clause())
    }

    /// Data query; the two trailing placeholders are `LIMIT` and `OFFSET`.
    #[must_use]
    pub fn page_sql(&self) -> String {
        let next = self.params.len() + 1;
        let order = self.order.keyword();
        format!(
            "{SELECT_COLUMNS} {FROM_BOOKS} {} ORDER BY {} {order} NULLS LAST, b.id {order} LIMIT ${} OFFSET ${}",
            self.where_clause(),
            self.sort.column(),
            next,
            next + 1,
        )
    }

    /// Full parameter list for [`Self::page_sql`].
    #[must_use]
    pub fn page_params(&self) -> Vec<BindValue> {
        let mut params = self.params.clone();
        params.push(BindValue::BigInt(self.page.limit));
        params.push(BindValue::BigInt(self.page.offset()));
        params
    }

    #[must_use]
    pub fn pagination(&self, total: i64) -> Pagination {
        self.page.pagination(total)
    }
}

fn parse_id(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|v| v.trim().parse::<i32>().ok())
}

fn arguments(values: &[BindValue]) -> Result<PgArguments, sqlx::Error> {
    let mut args = PgArguments::default();
    for value in values {
        let added = match value {
            BindValue::Text(s) => args.add(s.clone()),
            BindValue::Int(i) => args.add(*i),
            BindValue::BigInt(i) => args.add(*i),
            BindValue::Status(s) => args.add(*s),
        };
        added.map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Run the count and data queries for one catalog page.
///
/// # Errors
/// Returns database errors.
pub async fn fetch_page(pool: &PgPool, query: &CatalogQuery) -> AppResult<BookListResponse> {
    let count_sql = query.count_sql();
    let total: i64 = sqlx::query_scalar_with(&count_sql, arguments(query.params())?)
        .fetch_one(pool)
        .await?;

    let page_sql = query.page_sql();
    let books = sqlx::query_as_with::<_, BookSummary, _>(&page_sql, arguments(&query.page_params())?)
        .fetch_all(pool)
        .await?;

    tracing::debug!(
        total,
        returned = books.len(),
        sort = query.sort.column(),
        "catalog page fetched"
    );

    Ok(BookListResponse {
        books,
        pagination: query.pagination(total),
    })
}
