//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD tag or AAD mismatch. Carries no further detail so callers cannot
    /// distinguish a wrong key from tampered data.
    #[error("decryption failed: wrong key/passphrase or tampered data")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid key format: {0}")]
    KeyFormat(String),

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("escrow context field too long: {0} bytes")]
    ContextField(usize),
}
