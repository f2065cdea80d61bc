use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::config::CONFIG;
use crate::utils::http::get_http_client;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

pub fn is_supported_image_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
    )
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Sniffs and size-checks an uploaded image, and runs it through a decode to
/// reject byte soup early. HEIC passes on the sniff alone since the decoder
/// stack does not cover it.
pub fn prepare_image(bytes: Vec<u8>) -> Result<ImageFile> {
    if bytes.is_empty() {
        return Err(anyhow!("Image payload is empty"));
    }
    if bytes.len() > CONFIG.max_upload_bytes {
        return Err(anyhow!(
            "Image payload of {} bytes exceeds the {} byte limit",
            bytes.len(),
            CONFIG.max_upload_bytes
        ));
    }

    let mime_type = detect_mime_type(&bytes)
        .map(|mime| normalize_image_mime(&mime))
        .ok_or_else(|| anyhow!("Could not determine the image type"))?;
    if !is_supported_image_mime(&mime_type) {
        return Err(anyhow!("Unsupported image type {mime_type}"));
    }

    if mime_type != "image/heic" && mime_type != "image/heif" {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| anyhow!("Image failed to decode: {err}"))?;
        debug!(
            "Accepted {} upload ({}x{}, {} bytes)",
            mime_type,
            decoded.width(),
            decoded.height(),
            bytes.len()
        );
    }

    Ok(ImageFile { bytes, mime_type })
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

pub async fn download_media(url: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch image {url}: {err} (timeout={}, connect={}, status={:?}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Image download failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
            tokio::time::sleep(delay).await;
            continue;
        }

        return match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read image bytes {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    None
                } else {
                    let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_legacy_jpeg_alias() {
        assert_eq!(normalize_image_mime("image/JPG"), "image/jpeg");
        assert_eq!(normalize_image_mime(" image/png "), "image/png");
    }

    #[test]
    fn sniffs_png_magic_bytes() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0, 0];
        assert_eq!(
            detect_mime_type(&png_header).as_deref(),
            Some("image/png")
        );
    }

    #[test]
    fn rejects_empty_and_undecodable_payloads() {
        assert!(prepare_image(Vec::new()).is_err());
        assert!(prepare_image(vec![0u8; 64]).is_err());
    }
}
