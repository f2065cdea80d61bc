use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{CONFIG, DESCRIBE_SYSTEM_PROMPT};
use crate::llm::media::ImageFile;
use crate::prompt::{parse_prompt_text, StructuredPrompt};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct ImageGenerationError(pub String);

/// Optional knobs for the image model's `imageConfig` block.
#[derive(Debug, Clone, Default)]
pub struct ImageGenConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const GEMINI_REQUEST_TIMEOUT_SECS: u64 = 90;

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z0-9_-]*\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

fn redact_gemini_api_key(text: &str) -> String {
    let key = CONFIG.gemini_api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings() -> Vec<Value> {
    let profile = CONFIG.gemini_safety_settings.as_str();
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

fn build_image_gen_config(config: Option<&ImageGenConfig>) -> Option<Value> {
    let config = config?;
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(content) = &candidate.content {
            if let Some(parts) = &content.parts {
                for part in parts {
                    match part {
                        GeminiPart::Text { text } => {
                            text_parts += 1;
                            if text_preview.is_none() && !text.trim().is_empty() {
                                text_preview = Some(truncate_for_log(text, 200));
                            }
                        }
                        GeminiPart::InlineData { inline_data } => {
                            if inline_data.mime_type.starts_with("image/") {
                                image_parts += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn build_parts(text: &str, images: &[ImageFile]) -> Vec<Value> {
    let mut parts = Vec::new();
    parts.push(json!({ "text": text }));
    for image in images {
        let encoded = general_purpose::STANDARD.encode(&image.bytes);
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": encoded
            }
        }));
    }
    parts
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<Vec<u8>> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::InlineData { inline_data } = part {
                        if inline_data.mime_type.starts_with("image/") {
                            if let Ok(bytes) = general_purpose::STANDARD.decode(inline_data.data) {
                                images.push(bytes);
                            }
                        }
                    }
                }
            }
        }
    }
    images
}

fn strip_code_fences(text: &str) -> &str {
    match CODE_FENCE_RE.captures(text) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or(text),
        None => text.trim(),
    }
}

/// Maps the model's reply onto a structured record. JSON replies are adopted
/// directly; anything else falls back to the line-oriented text parser.
fn adopt_model_reply(reply: &str) -> StructuredPrompt {
    let stripped = strip_code_fences(reply);
    match serde_json::from_str::<Value>(stripped) {
        Ok(value) if value.is_object() => StructuredPrompt::from_json(&value),
        _ => parse_prompt_text(stripped),
    }
}

async fn call_gemini_api(model: &str, payload: Value) -> Result<GeminiResponse> {
    let client = get_http_client();
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
        model, CONFIG.gemini_api_key
    );

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match client
            .post(&url)
            .timeout(Duration::from_secs(GEMINI_REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = redact_gemini_api_key(&err.to_string());
                let should_retry =
                    gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, status={:?}, retrying={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Gemini request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry =
                gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
            warn!(
                "Gemini API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(gemini_retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response.json::<GeminiResponse>().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = model, response = %response_summary);
        }
        return Ok(value);
    }
}

/// Sends the image inline and asks the model for a structured prompt keyed
/// by the schema identifiers.
pub async fn describe_image(image: ImageFile) -> Result<StructuredPrompt> {
    if CONFIG.gemini_api_key.trim().is_empty() {
        return Err(anyhow!("GEMINI_API_KEY is not configured"));
    }

    let parts = build_parts(
        "Describe this image as a structured generation prompt.",
        std::slice::from_ref(&image),
    );
    let payload = json!({
        "systemInstruction": { "parts": [{ "text": DESCRIBE_SYSTEM_PROMPT.as_str() }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": CONFIG.gemini_temperature,
            "topK": CONFIG.gemini_top_k,
            "topP": CONFIG.gemini_top_p,
            "maxOutputTokens": CONFIG.gemini_max_output_tokens,
            "responseMimeType": "application/json",
        },
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_model;
    let metadata = json!({ "imageBytes": image.bytes.len(), "mimeType": image.mime_type });
    log_llm_timing("gemini", model, "describe_image", Some(metadata), || async {
        let response = call_gemini_api(model, payload).await?;
        let reply = extract_text_from_response(response);
        if reply.trim().is_empty() {
            return Err(anyhow!("Gemini returned no text for the image"));
        }
        Ok(adopt_model_reply(&reply))
    })
    .await
}

/// Renders images from prompt text, optionally conditioned on reference
/// images sent inline.
pub async fn generate_image(
    prompt: &str,
    reference_images: &[ImageFile],
    config: Option<ImageGenConfig>,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    if CONFIG.gemini_api_key.trim().is_empty() {
        return Err(ImageGenerationError(
            "GEMINI_API_KEY is not configured".to_string(),
        ));
    }

    let base_instruction = if reference_images.is_empty() {
        "Generate an image based on the prompt. CRITICAL: response must be an image, NOT TEXT."
    } else {
        "Edit the images based on the prompt. CRITICAL: response must be an image, NOT TEXT."
    };

    let parts = build_parts(prompt, reference_images);
    let mut generation_config = json!({
        "responseModalities": ["TEXT", "IMAGE"]
    });
    if let Some(image_config) = build_image_gen_config(config.as_ref()) {
        if let Some(config_object) = generation_config.as_object_mut() {
            config_object.insert("imageConfig".to_string(), image_config);
        }
    }

    let payload = json!({
        "systemInstruction": { "parts": [{ "text": base_instruction }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_image_model;
    let metadata = json!({ "promptChars": prompt.chars().count(), "referenceImages": reference_images.len() });
    let images = log_llm_timing("gemini", model, "generate_image", Some(metadata), || async {
        let response = call_gemini_api(model, payload).await?;
        Ok(extract_images_from_response(response))
    })
    .await
    .map_err(|err| ImageGenerationError(err.to_string()))?;

    if images.is_empty() {
        return Err(ImageGenerationError(format!(
            "No images returned by Gemini (model: {})",
            model
        )));
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json_replies() {
        let reply = "```json\n{\"subject\": \"a cat\"}\n```";
        assert_eq!(strip_code_fences(reply), "{\"subject\": \"a cat\"}");
        assert_eq!(strip_code_fences("  plain text  "), "plain text");
    }

    #[test]
    fn adopts_json_replies_directly() {
        let record = adopt_model_reply("{\"subject\": \"a cat\", \"mood\": \"serene\"}");
        assert_eq!(record.get("subject"), Some("a cat"));
        assert_eq!(record.get("mood"), Some("serene"));
    }

    #[test]
    fn falls_back_to_text_parsing_for_non_json_replies() {
        let record = adopt_model_reply("Subject: a cat\nMood: serene");
        assert_eq!(record.get("subject"), Some("a cat"));
        assert_eq!(record.get("mood"), Some("serene"));
    }

    #[test]
    fn non_object_json_replies_go_through_the_text_parser() {
        let record = adopt_model_reply("\"Subject: a cat\"");
        assert!(record.is_empty());
    }
}
