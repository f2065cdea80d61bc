use axum::extract::State;
use axum::Json;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::handlers::sessions::session_payload;
use crate::handlers::ApiError;
use crate::llm::describe_image;
use crate::llm::media::{download_media, prepare_image, ImageFile};
use crate::session::{AppState, PromptSession};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub image_url: Option<String>,
    pub image_base64: Option<String>,
}

async fn resolve_image(request: &DescribeRequest) -> Result<ImageFile, ApiError> {
    let bytes = if let Some(encoded) = request.image_base64.as_deref() {
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|err| ApiError::BadRequest(format!("Invalid base64 image payload: {err}")))?
    } else if let Some(raw_url) = request.image_url.as_deref() {
        let parsed = Url::parse(raw_url)
            .map_err(|err| ApiError::BadRequest(format!("Invalid image URL: {err}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ApiError::BadRequest(format!(
                "Unsupported image URL scheme '{}'",
                parsed.scheme()
            )));
        }
        download_media(parsed.as_str())
            .await
            .ok_or_else(|| ApiError::Upstream(format!("Could not download image from {parsed}")))?
    } else {
        return Err(ApiError::BadRequest(
            "Either imageUrl or imageBase64 is required".to_string(),
        ));
    };

    prepare_image(bytes).map_err(|err| ApiError::BadRequest(err.to_string()))
}

/// Image in, structured prompt out: the Gemini reply (JSON or labelled text)
/// is adopted into a fresh session whose flat text is the canonical form.
pub async fn describe(
    State(state): State<AppState>,
    Json(request): Json<DescribeRequest>,
) -> Result<Json<Value>, ApiError> {
    let image = resolve_image(&request).await?;
    let record = describe_image(image)
        .await
        .map_err(|err| ApiError::Upstream(err.to_string()))?;

    let mut session = PromptSession::new();
    session.adopt_record(record);
    let id = state.insert_session(session.clone());
    info!("Described image into session {id}");
    Ok(Json(session_payload(&id, &session)))
}
