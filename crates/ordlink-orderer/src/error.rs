use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrdererError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Block {got} does not extend the ledger at height {height}")]
    NonContiguous { height: u64, got: u64 },

    #[error("Block {0} does not link to the previous header")]
    BrokenChain(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] ordlink_core::CoreError),
}

impl IntoResponse for OrdererError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            OrdererError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            OrdererError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            OrdererError::NonContiguous { .. } | OrdererError::BrokenChain(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            OrdererError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            OrdererError::Core(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}
