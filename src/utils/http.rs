use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
});

/// Shared outbound client; per-request timeouts override the default where a
/// call is expected to run long (image generation).
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
