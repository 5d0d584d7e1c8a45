//! Store-level properties. These need a PostgreSQL server:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use library_catalog::{
    AddToLibraryRequest, AppError, AppState, Caller, ClientMeta, Config, ReviewRequest, Role,
    UserContext,
    catalog::{CatalogQuery, ListBooksQuery, fetch_page},
    download::{DownloadRequest, download_document},
    handlers::{
        AppJson,
        books::get_book,
        collection::{add_review, add_to_library},
    },
};
use sqlx::PgPool;
use uuid::Uuid;

fn storage_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("catalog-store-{}", Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("books")).unwrap();
    dir
}

fn config(storage_root: PathBuf) -> Config {
    Config {
        database_url: String::new(),
        jwt_secret: "store_access".into(),
        jwt_refresh_secret: "store_refresh".into(),
        access_token_ttl: Duration::from_secs(900),
        refresh_token_ttl: Duration::from_secs(86_400),
        server_port: 0,
        storage_root,
        db_max_connections: 5,
        db_acquire_timeout: Duration::from_secs(2),
        db_statement_timeout: Duration::from_secs(10),
        tx_warn_after: Duration::from_secs(5),
        rate_limit_per_minute: 1000,
        cors_origins: Vec::new(),
        trust_proxy: false,
    }
}

async fn seed_user(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name) VALUES ($1, $2, 'x', 'Test Reader')",
    )
    .bind(id)
    .bind(format!("{id}@example.com"))
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn seed_book(pool: &PgPool, title: &str, status: &str, file_path: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO books (id, title, file_path, file_format, status) \
         VALUES ($1, $2, $3, 'pdf', $4::book_status)",
    )
    .bind(id)
    .bind(title)
    .bind(file_path)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn download_state(pool: &PgPool, book_id: Uuid) -> (i64, i64) {
    let counter: i64 = sqlx::query_scalar("SELECT download_count FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_history WHERE book_id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap();
    (counter, rows)
}

fn request(document_id: Uuid, user_id: Uuid) -> DownloadRequest {
    DownloadRequest {
        document_id,
        user_id,
        client: ClientMeta {
            ip: Some("198.51.100.7".into()),
            user_agent: Some("store-test".into()),
        },
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_downloads_are_both_counted(pool: PgPool) {
    let root = storage_root();
    std::fs::write(root.join("books/a.pdf"), b"%PDF-1.4").unwrap();
    let user = seed_user(&pool).await;
    let book = seed_book(&pool, "Temur Tuzuklari", "active", "books/a.pdf").await;

    let budget = Duration::from_secs(5);
    let first = request(book, user);
    let second = request(book, user);
    let (a, b) = tokio::join!(
        download_document(&pool, &root, budget, &first),
        download_document(&pool, &root, budget, &second),
    );

    let ticket = a.unwrap();
    b.unwrap();
    assert_eq!(ticket.filename, "Temur Tuzuklari.pdf");
    assert_eq!(ticket.content_type, "application/pdf");
    assert_eq!(download_state(&pool, book).await, (2, 2));

    let events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM analytics_events WHERE book_id = $1 AND event_type = 'download'",
    )
    .bind(book)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(events, 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn inactive_or_missing_documents_leave_no_trace(pool: PgPool) {
    let root = storage_root();
    let user = seed_user(&pool).await;
    let inactive = seed_book(&pool, "Hidden", "inactive", "books/h.pdf").await;

    let err = download_document(&pool, &root, Duration::from_secs(5), &request(inactive, user))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    assert_eq!(download_state(&pool, inactive).await, (0, 0));

    let err = download_document(&pool, &root, Duration::from_secs(5), &request(Uuid::new_v4(), user))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_history")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failure_mid_transaction_rolls_everything_back(pool: PgPool) {
    let root = storage_root();
    let book = seed_book(&pool, "Orphan", "active", "books/o.pdf").await;

    // Unknown user: the history insert violates its foreign key.
    let err = download_document(&pool, &root, Duration::from_secs(5), &request(book, Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transaction(_)));
    assert_eq!(download_state(&pool, book).await, (0, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn missing_file_is_reported_after_commit(pool: PgPool) {
    let root = storage_root();
    let user = seed_user(&pool).await;
    let book = seed_book(&pool, "Ghost", "active", "books/not-there.pdf").await;

    let err = download_document(&pool, &root, Duration::from_secs(5), &request(book, user))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FileMissing));
    assert_eq!(download_state(&pool, book).await, (1, 1));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn search_example_paginates_active_matches(pool: PgPool) {
    for title in ["Temur Tuzuklari", "Amir Temur", "Temur va uning davri"] {
        seed_book(&pool, title, "active", "books/x.pdf").await;
    }
    seed_book(&pool, "Temur (draft)", "inactive", "books/x.pdf").await;
    seed_book(&pool, "Kecha va Kunduz", "active", "books/x.pdf").await;

    let mut raw = ListBooksQuery::default();
    raw.search = Some("Temur".into());
    raw.page = Some("1".into());
    raw.limit = Some("2".into());
    let first = fetch_page(&pool, &CatalogQuery::build(&raw, &Caller::Anonymous))
        .await
        .unwrap();
    assert_eq!(first.books.len(), 2);
    assert_eq!(first.pagination.total_books, 3);
    assert_eq!(first.pagination.total_pages, 2);

    raw.page = Some("2".into());
    let last = fetch_page(&pool, &CatalogQuery::build(&raw, &Caller::Anonymous))
        .await
        .unwrap();
    assert_eq!(last.books.len(), 1);

    raw.status = Some("all".into());
    let reader = Caller::Authenticated(UserContext {
        user_id: Uuid::new_v4(),
        role: Role::Reader,
    });
    let as_reader = fetch_page(&pool, &CatalogQuery::build(&raw, &reader)).await.unwrap();
    assert_eq!(as_reader.pagination.total_books, 3);

    let admin = Caller::Authenticated(UserContext {
        user_id: Uuid::new_v4(),
        role: Role::Admin,
    });
    let as_admin = fetch_page(&pool, &CatalogQuery::build(&raw, &admin)).await.unwrap();
    assert_eq!(as_admin.pagination.total_books, 4);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn library_add_is_idempotent(pool: PgPool) {
    let user = seed_user(&pool).await;
    let book = seed_book(&pool, "Ikki eshik orasi", "active", "books/x.pdf").await;
    let state = Arc::new(AppState::new(pool.clone(), config(storage_root())));
    let ctx = UserContext {
        user_id: user,
        role: Role::Reader,
    };

    let Json(first) = add_to_library(
        State(state.clone()),
        Extension(ctx),
        AppJson(AddToLibraryRequest { book_id: book }),
    )
    .await
    .unwrap();
    let Json(second) = add_to_library(
        State(state),
        Extension(ctx),
        AppJson(AddToLibraryRequest { book_id: book }),
    )
    .await
    .unwrap();

    assert!(first.added);
    assert!(!second.added);
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_library WHERE user_id = $1")
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn second_review_replaces_first_and_aggregate_follows(pool: PgPool) {
    let user = seed_user(&pool).await;
    let book = seed_book(&pool, "Sariq devni minib", "active", "books/x.pdf").await;
    let state = Arc::new(AppState::new(pool.clone(), config(storage_root())));
    let ctx = UserContext {
        user_id: user,
        role: Role::Reader,
    };

    for rating in [2, 5] {
        add_review(
            State(state.clone()),
            Path(book),
            Extension(ctx),
            AppJson(ReviewRequest {
                rating,
                comment: Some("fine".into()),
            }),
        )
        .await
        .unwrap();
    }

    let (avg, count): (f64, i32) =
        sqlx::query_as("SELECT rating_avg, rating_count FROM books WHERE id = $1")
            .bind(book)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    assert!((avg - 5.0).abs() < f64::EPSILON);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn detail_view_counts_views_and_hides_inactive(pool: PgPool) {
    let category: i32 = sqlx::query_scalar(
        "INSERT INTO categories (name_uz, slug) VALUES ('Tarix', 'tarix') RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let book = seed_book(&pool, "Boburnoma", "active", "books/x.pdf").await;
    sqlx::query("INSERT INTO book_categories (book_id, category_id) VALUES ($1, $2)")
        .bind(book)
        .bind(category)
        .execute(&pool)
        .await
        .unwrap();
    let hidden = seed_book(&pool, "Draft", "inactive", "books/x.pdf").await;
    let state = Arc::new(AppState::new(pool.clone(), config(storage_root())));

    let Json(detail) = get_book(State(state.clone()), Path(book)).await.unwrap();
    assert_eq!(detail.title, "Boburnoma");
    assert_eq!(detail.categories.0.len(), 1);
    assert_eq!(detail.categories.0[0].slug, "tarix");

    get_book(State(state.clone()), Path(book)).await.unwrap();
    let views: i64 = sqlx::query_scalar("SELECT view_count FROM books WHERE id = $1")
        .bind(book)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(views, 2);

    let err = get_book(State(state), Path(hidden)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}
