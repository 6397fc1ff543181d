pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

const JSON_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Routes mounted under `/api/v1/posts`.
pub fn build_posts_router(state: ApiState) -> Router<ApiState> {
    Router::new()
        .route("/", get(handlers::find_post))
        .route("/create_post", post(handlers::create_post))
        .route("/stats", get(handlers::post_stats))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT_BYTES))
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::client_rate_limit,
        ))
}
