use std::{sync::OnceLock, time::Duration};

use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::{debug, warn};

/// Browser-like user agent; several sites refuse the reqwest default.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builder shared by every source adapter.
pub fn client_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    install_rustls_provider();
    reqwest::Client::builder()
        .user_agent(DEFAULT_UA)
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(4)
}

/// Build the shared client, falling back to reqwest defaults if the tuned
/// builder is rejected.
pub fn build_client(connect_timeout: Duration) -> reqwest::Client {
    client_builder(connect_timeout)
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to create tuned HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

/// Extract a cookie value from `Set-Cookie` response headers.
pub fn set_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|kv| kv.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}
