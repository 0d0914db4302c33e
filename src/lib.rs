pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod license;
pub mod models;
pub mod slack;
pub mod update_mask;
pub mod util;
pub mod validator;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// The HTTP API with request tracing.
pub fn app(state: AppState) -> Router {
    handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
