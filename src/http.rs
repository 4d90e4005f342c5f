// Shared HTTP client for all network operations

use std::time::Duration;

/// Default request timeout (generous enough for large repository clones
/// over HTTPS where git2 delegates to libcurl via this same client config).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for quick API calls (installation token exchange, webhook replay checks).
pub const FAST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the shared HTTP client with appropriate defaults.
///
/// This client should be created once at startup and passed to all
/// modules that need HTTP access. Uses connection pooling internally.
pub fn create_shared_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
