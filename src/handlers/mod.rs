pub mod describe;
pub mod generate;
pub mod health;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, routing::put, Json, Router};
use serde_json::json;

use crate::session::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("Unknown prompt field '{0}'")]
    UnknownField(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Upstream generation failed: {0}")]
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::UnknownField(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/{id}", get(sessions::get_session))
        .route("/api/sessions/{id}/text", put(sessions::put_text))
        .route(
            "/api/sessions/{id}/fields/{field}",
            put(sessions::put_field),
        )
        .route("/api/describe", post(describe::describe))
        .route("/api/generate", post(generate::generate))
        .with_state(state)
}
