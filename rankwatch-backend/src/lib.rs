pub mod bus;
pub mod config;
pub mod crawler;
mod error;
pub mod helpers;
pub mod notifier;
pub mod observer;
mod routes;
pub mod validation;

use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use error::{AppError, ErrorResponse};

pub struct AppState {
    pub db: rankwatch_db::Database,
}

/// Create the read-only API router over the given database
pub fn create_app(
    db: rankwatch_db::Database,
    request_body_limit: usize,
    request_timeout: Duration,
) -> Router {
    let state = Arc::new(AppState { db });

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/players", get(routes::ranked))
        .route("/players/online", get(routes::online))
        .route("/players/{name}", get(routes::player))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
