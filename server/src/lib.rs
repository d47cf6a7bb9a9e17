//! LeafScan inference server
//!
//! Accepts leaf images over HTTP, classifies them with a loaded model and
//! optionally keeps a history of predictions.

pub mod error;
pub mod history;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, SharedState};

/// Build the application router
pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/predict", post(routes::predict::predict))
        .route("/uploads/*filename", get(routes::uploads::serve_upload))
        .route("/history", get(routes::history::get_history))
        .route("/health", get(routes::health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
