//! Cloud client configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the cloud control-plane client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL for the Seclave API (e.g., "https://api.seclave.io").
    pub api_base_url: String,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Soft TTL for cached team encryption keys (seconds). Expiry triggers a
    /// re-fetch, never an error.
    pub team_key_ttl_secs: u64,

    /// Interval between background distribution passes (seconds).
    pub distribution_interval_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.seclave.io".to_string(),
            request_timeout_secs: 30,
            team_key_ttl_secs: 300,
            distribution_interval_secs: 120,
        }
    }
}

impl CloudConfig {
    /// Creates a config pointing at a local mock server.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }
}
