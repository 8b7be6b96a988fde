use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{deliver, get_status, set_withholding, AppState};

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(get_status))
        .route("/deliver", post(deliver))
        .route("/admin/withhold", post(set_withholding))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
