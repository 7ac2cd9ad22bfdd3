//! Cloud client error types.

use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur in cloud key-management operations.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid wire encoding: {0}")]
    Encoding(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] seclave_crypto::CryptoError),

    #[error("vault error: {0}")]
    Vault(#[from] seclave_vault::VaultError),
}
