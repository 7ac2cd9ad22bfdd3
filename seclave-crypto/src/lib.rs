//! Client-side key management core for Seclave.
//!
//! Zero-knowledge design: the server only ever stores ciphertext, wrapped
//! keys and opaque hashes. All derivation, wrapping and unwrapping in this
//! crate happens on the client.
//!
//! # Key chains
//!
//! 1. **Wrapping key**: PBKDF2-HMAC-SHA256 over the passphrase and the public
//!    account salt. Derived once per unlock, never stored. Wraps/unwraps the
//!    root [`kdf::SecretKey`] and nothing else.
//! 2. **Purpose keys**: HKDF-SHA256 over the root SecretKey with a fixed info
//!    string per purpose (vault encryption, server auth, ECDH key-at-rest).
//!    Different info strings yield computationally independent keys, so the
//!    server-facing auth key can never expose vault contents.
//! 3. **Escrow keys**: ephemeral P-256 ECDH plus HKDF with a fresh random
//!    salt, used identically for team-key distribution and emergency-access
//!    escrow.
//! 4. **Recovery key**: 32 random bytes rendered once as a checksummed Base32
//!    string; re-wraps the root SecretKey independently of the passphrase.

pub mod cipher;
mod error;
pub mod escrow;
pub mod kdf;
pub mod recovery;

pub use cipher::{
    check_verification_artifact, decrypt, decrypt_string, encrypt, encrypt_string,
    encrypt_with_iv, make_verification_artifact, unwrap_secret_key, wrap_secret_key,
    EncryptedData, NONCE_SIZE, TAG_SIZE, VERIFICATION_PLAINTEXT,
};
pub use error::{CryptoError, CryptoResult};
pub use escrow::{
    agree_wrap_key, open_secret_key, open_team_key, seal_secret_key, seal_team_key, EcdhKeyPair,
    EscrowContext, EscrowRecord, EscrowScope, WRAP_VERSION,
};
pub use kdf::{
    compute_auth_hash, derive_auth_key, derive_ecdh_wrapping_key, derive_encryption_key,
    derive_team_encryption_key, derive_wrapping_key, AccountSalt, AeadKey, AuthKey, SecretKey,
    TeamKey, KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE,
};
pub use recovery::{RecoveryKey, RecoveryKeyFormatError, RecoveryWrappedSecretKey};

/// HKDF-SHA256 extract-and-expand into a single 256-bit key.
pub(crate) fn hkdf_expand(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> CryptoResult<[u8; kdf::KEY_SIZE]> {
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; kdf::KEY_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Hex serde for binary fields exchanged with the persistence layer.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(&value).map_err(serde::de::Error::custom)
    }
}
