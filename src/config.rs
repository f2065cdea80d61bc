use std::env;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::prompt::SCHEMA;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub server_host: String,
    pub server_port: u16,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub max_upload_bytes: usize,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            server_host: env_string("SERVER_HOST", "0.0.0.0"),
            server_port: env_u16("SERVER_PORT", 3000),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_top_k: env_i32("GEMINI_TOP_K", 40),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 2048),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            max_upload_bytes: env_usize("MAX_UPLOAD_BYTES", 15 * 1024 * 1024),
        })
    }
}

/// System prompt for turning an image into a structured prompt. The key list
/// is spliced in from the schema so the two can never drift apart.
pub static DESCRIBE_SYSTEM_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"You are an expert prompt engineer for generative image models.
Analyze the provided image and distill it into a reusable generation prompt.

Output a single valid JSON object with exactly these string keys:
{keys}

Rules:
1. Every value is plain free text; leave a key's value as "" when the image gives no signal for it.
2. "negativePrompt" lists artifacts to avoid (e.g. "blurry, watermark, text").
3. Be concrete and visual; no commentary, no markdown.

Return ONLY the raw JSON string."#,
        keys = SCHEMA
            .iter()
            .map(|identifier| format!("  \"{identifier}\""))
            .collect::<Vec<_>>()
            .join(",\n")
    )
});
