use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::handlers::ApiError;
use crate::session::{AppState, PromptSession};

pub(crate) fn session_payload(id: &str, session: &PromptSession) -> Value {
    json!({
        "sessionId": id,
        "text": session.flat_text,
        "record": session.record.to_json(),
    })
}

pub async fn create_session(State(state): State<AppState>) -> Json<Value> {
    let (id, session) = state.create_session();
    info!("Created prompt session {id}");
    Json(session_payload(&id, &session))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.get_session(&id).ok_or(ApiError::SessionNotFound)?;
    Ok(Json(session_payload(&id, &session)))
}

#[derive(Debug, Deserialize)]
pub struct TextEditRequest {
    pub text: String,
}

/// Flat-text edit. `matched` tells the editor whether the text decomposed
/// into any structured field; when it did not, the text is still kept and
/// the structured view shows the empty record.
pub async fn put_text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TextEditRequest>,
) -> Result<Json<Value>, ApiError> {
    let (matched, session) = state
        .with_session(&id, |session| {
            let matched = session.apply_text_edit(request.text);
            (matched, session.clone())
        })
        .ok_or(ApiError::SessionNotFound)?;

    let mut payload = session_payload(&id, &session);
    payload["matched"] = json!(matched);
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
pub struct FieldEditRequest {
    pub value: String,
}

pub async fn put_field(
    State(state): State<AppState>,
    Path((id, field)): Path<(String, String)>,
    Json(request): Json<FieldEditRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .with_session(&id, |session| {
            session
                .apply_field_edit(&field, request.value)
                .map(|_| session.clone())
        })
        .ok_or(ApiError::SessionNotFound)?;

    let session = outcome.ok_or_else(|| ApiError::UnknownField(field))?;
    Ok(Json(session_payload(&id, &session)))
}
