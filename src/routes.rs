use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header::STRICT_TRANSPORT_SECURITY},
    middleware,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::{AppState, handlers, middleware_auth};

/// Assemble the full HTTP surface around `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh_token))
        .route("/api/books/resources", get(handlers::books::list_resources))
        .route("/api/books/{id}", get(handlers::books::get_book));

    let optional_auth_routes = Router::new()
        .route("/api/books", get(handlers::books::list_books))
        .route("/api/books/{id}/reviews", get(handlers::collection::list_reviews))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::optional_auth_middleware,
        ));

    let protected_routes = Router::new()
        .route("/api/books/{id}/download", post(handlers::books::download_book))
        .route("/api/books/library", post(handlers::collection::add_to_library))
        .route("/api/books/library/my", get(handlers::collection::list_library))
        .route("/api/books/{id}/review", post(handlers::collection::add_review))
        .route("/api/admin/analytics", get(handlers::admin::analytics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::auth_middleware,
        ));

    let hsts_value: HeaderValue =
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload");

    Router::new()
        .merge(public_routes)
        .merge(optional_auth_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::client_context,
        ))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            hsts_value,
        ))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
