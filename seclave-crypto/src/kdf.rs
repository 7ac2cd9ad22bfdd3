//! Key derivation chains.
//!
//! Two stages. The expensive stretch runs once per unlock: PBKDF2-HMAC-SHA256
//! over the passphrase and the public account salt yields the wrapping key.
//! Everything else is cheap purpose separation: HKDF-SHA256 over the root
//! SecretKey with an all-zero 32-byte salt (the key already has full entropy)
//! and a fixed info string per purpose. Keys derived with different info
//! strings are computationally independent — a ciphertext under one cannot
//! decrypt under another.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::hkdf_expand;

/// Size of all symmetric keys (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of account and HKDF salts (256 bits).
pub const SALT_SIZE: usize = 32;

/// PBKDF2 iteration count for the passphrase stretch.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

pub(crate) const ZERO_SALT: [u8; SALT_SIZE] = [0u8; SALT_SIZE];

const INFO_ENCRYPTION: &[u8] = b"enc";
const INFO_AUTH: &[u8] = b"auth";
const INFO_ECDH_WRAP: &[u8] = b"ecdh";
const INFO_TEAM_ENCRYPTION: &[u8] = b"org-enc";

/// Public per-account salt for the passphrase stretch. Persisted server-side,
/// transmitted as hex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSalt([u8; SALT_SIZE]);

impl AccountSalt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> CryptoResult<Self> {
        let decoded = hex::decode(value).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        if decoded.len() != SALT_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SALT_SIZE,
                actual: decoded.len(),
            });
        }
        let mut bytes = [0u8; SALT_SIZE];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// A 256-bit AES-GCM key. Opaque: raw bytes never leave this crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for AeadKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for AeadKey {}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

/// The vault's root secret. Created once at setup, persisted only as
/// ciphertext, unwrapped in memory while the vault is unlocked.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Per-team payload key. Never persisted unwrapped — always escrowed per
/// member through the wrap protocol.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TeamKey([u8; KEY_SIZE]);

impl TeamKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// HMAC key for the server-facing auth hash. The single deliberate exception
/// to key opacity: its raw bytes are readable, solely so they can be hashed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthKey([u8; KEY_SIZE]);

impl AuthKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Stretches a passphrase into the 256-bit wrapping key.
///
/// Deterministic for a given (passphrase, salt) pair. The result wraps and
/// unwraps the root SecretKey and nothing else.
pub fn derive_wrapping_key(passphrase: &str, salt: &AccountSalt) -> AeadKey {
    let mut okm = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut okm,
    );
    let key = AeadKey::from_bytes(okm);
    okm.zeroize();
    key
}

/// AES-GCM key for all personal vault ciphertext.
pub fn derive_encryption_key(secret: &SecretKey) -> CryptoResult<AeadKey> {
    purpose_key(secret.bytes(), INFO_ENCRYPTION)
}

/// Key that wraps ECDH private keys at rest.
pub fn derive_ecdh_wrapping_key(secret: &SecretKey) -> CryptoResult<AeadKey> {
    purpose_key(secret.bytes(), INFO_ECDH_WRAP)
}

/// AES-GCM key for shared team vault ciphertext.
pub fn derive_team_encryption_key(team_key: &TeamKey) -> CryptoResult<AeadKey> {
    purpose_key(team_key.bytes(), INFO_TEAM_ENCRYPTION)
}

/// Server-facing auth key, domain-separated from every encryption key.
pub fn derive_auth_key(secret: &SecretKey) -> CryptoResult<AuthKey> {
    let mut okm = hkdf_expand(secret.bytes(), &ZERO_SALT, INFO_AUTH)?;
    let key = AuthKey(okm);
    okm.zeroize();
    Ok(key)
}

/// Opaque hash the server may use for rate-limiting and logging. SHA-256 of
/// the auth key bytes, hex-encoded; reveals nothing about vault keys.
pub fn compute_auth_hash(secret: &SecretKey) -> CryptoResult<String> {
    let auth_key = derive_auth_key(secret)?;
    Ok(hex::encode(Sha256::digest(auth_key.as_bytes())))
}

fn purpose_key(ikm: &[u8], info: &[u8]) -> CryptoResult<AeadKey> {
    let mut okm = hkdf_expand(ikm, &ZERO_SALT, info)?;
    let key = AeadKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}
