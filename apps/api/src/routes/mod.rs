pub mod health;

use axum::{extract::DefaultBodyLimit, routing::get, Router};

use crate::ideas::handlers;
use crate::state::AppState;

/// 10 MiB attachment ceiling plus multipart framing headroom.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api",
            get(handlers::dispatch_get).post(handlers::dispatch_post),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
