use axum::extract::State;
use axum::Json;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::handlers::ApiError;
use crate::llm::media::detect_mime_type;
use crate::llm::{generate_image, ImageGenConfig};
use crate::session::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub session_id: Option<String>,
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

fn resolve_prompt(state: &AppState, request: &GenerateRequest) -> Result<String, ApiError> {
    if let Some(prompt) = request.prompt.as_deref() {
        if !prompt.trim().is_empty() {
            return Ok(prompt.to_string());
        }
    }

    let Some(session_id) = request.session_id.as_deref() else {
        return Err(ApiError::BadRequest(
            "Either prompt or sessionId is required".to_string(),
        ));
    };
    let session = state
        .get_session(session_id)
        .ok_or(ApiError::SessionNotFound)?;
    if session.flat_text.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Session has no prompt text to generate from".to_string(),
        ));
    }
    Ok(session.flat_text)
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = resolve_prompt(&state, &request)?;
    let config = ImageGenConfig {
        aspect_ratio: request.aspect_ratio.clone(),
        image_size: request.image_size.clone(),
    };

    let images = generate_image(&prompt, &[], Some(config))
        .await
        .map_err(|err| ApiError::Upstream(err.to_string()))?;

    info!("Generated {} image(s)", images.len());
    let encoded: Vec<Value> = images
        .iter()
        .map(|bytes| {
            json!({
                "mimeType": detect_mime_type(bytes).unwrap_or_else(|| "image/png".to_string()),
                "data": general_purpose::STANDARD.encode(bytes),
            })
        })
        .collect();

    Ok(Json(json!({ "images": encoded })))
}
