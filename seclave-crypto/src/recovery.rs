//! Recovery keys.
//!
//! A recovery key is 32 random bytes shown to the user exactly once, as 52
//! Base32 characters plus a 2-character checksum, hyphenated into groups of
//! four. It wraps the root SecretKey through its own HKDF chain so a lost
//! passphrase does not mean a lost vault. The checksum catches typos locally;
//! it is not a security boundary.

use data_encoding::{DecodeKind, BASE32_NOPAD};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::{self, EncryptedData};
use crate::error::CryptoResult;
use crate::hkdf_expand;
use crate::kdf::{AeadKey, SecretKey, KEY_SIZE, SALT_SIZE};

/// Base32 characters carrying the key material (32 bytes = 256 bits at 5
/// bits per character, rounded up).
pub const DATA_CHARS: usize = 52;

/// Checksum characters appended after the data characters.
pub const CHECKSUM_CHARS: usize = 2;

/// Total characters excluding hyphens.
pub const TOTAL_CHARS: usize = DATA_CHARS + CHECKSUM_CHARS;

const GROUP: usize = 4;
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const RECOVERY_WRAP_INFO: &[u8] = b"recovery-wrap";
const RECOVERY_VERIFIER_INFO: &[u8] = b"recovery-verifier";

/// Why a typed-in recovery key failed to parse. Distinct variants so the UI
/// can point at the problem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryKeyFormatError {
    #[error("recovery key must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid character {found:?} at position {position}")]
    InvalidCharacter { found: char, position: usize },

    #[error("checksum mismatch: the key was mistyped")]
    InvalidChecksum,
}

/// 256-bit recovery key. Exists in memory only during generation and
/// recovery; never persisted or transmitted in any form.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecoveryKey([u8; KEY_SIZE]);

impl PartialEq for RecoveryKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for RecoveryKey {}

impl std::fmt::Debug for RecoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoveryKey(..)")
    }
}

impl RecoveryKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Renders the display form: 54 Base32 characters (52 data + 2 checksum)
    /// hyphenated into groups of four.
    pub fn format(&self) -> String {
        let mut chars = BASE32_NOPAD.encode(&self.0);
        let checksum = checksum_chars(&self.0);
        chars.push(checksum[0]);
        chars.push(checksum[1]);

        let mut out = String::with_capacity(TOTAL_CHARS + TOTAL_CHARS / GROUP);
        for (i, c) in chars.chars().enumerate() {
            if i > 0 && i % GROUP == 0 {
                out.push('-');
            }
            out.push(c);
        }
        out
    }

    /// Parses a typed-in recovery key. Hyphens and spaces are ignored and
    /// case is normalized, so "abcd-efgh" and "ABCD EFGH" read the same.
    pub fn parse(input: &str) -> Result<Self, RecoveryKeyFormatError> {
        let cleaned: String = input
            .chars()
            .filter(|c| *c != '-' && *c != ' ')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        // Checked first: past this point every character is one ASCII byte,
        // so byte offsets below are character offsets. `as u8` alone would
        // let truncated multi-byte characters alias into the alphabet.
        if let Some((position, found)) = cleaned
            .chars()
            .enumerate()
            .find(|(_, c)| !c.is_ascii() || !ALPHABET.contains(&(*c as u8)))
        {
            return Err(RecoveryKeyFormatError::InvalidCharacter { found, position });
        }
        if cleaned.len() != TOTAL_CHARS {
            return Err(RecoveryKeyFormatError::InvalidLength {
                expected: TOTAL_CHARS,
                actual: cleaned.len(),
            });
        }

        let (data, checksum) = cleaned.split_at(DATA_CHARS);
        let decoded =
            BASE32_NOPAD
                .decode(data.as_bytes())
                .map_err(|e| match e.kind {
                    DecodeKind::Symbol => RecoveryKeyFormatError::InvalidCharacter {
                        found: data.as_bytes()[e.position] as char,
                        position: e.position,
                    },
                    DecodeKind::Trailing => RecoveryKeyFormatError::InvalidChecksum,
                    _ => RecoveryKeyFormatError::InvalidLength {
                        expected: TOTAL_CHARS,
                        actual: data.len(),
                    },
                })?;
        if decoded.len() != KEY_SIZE {
            return Err(RecoveryKeyFormatError::InvalidLength {
                expected: TOTAL_CHARS,
                actual: cleaned.len(),
            });
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);

        let expected = checksum_chars(&bytes);
        let mut it = checksum.chars();
        if (it.next(), it.next()) != (Some(expected[0]), Some(expected[1])) {
            bytes.zeroize();
            return Err(RecoveryKeyFormatError::InvalidChecksum);
        }

        Ok(Self(bytes))
    }

    /// Opaque server-side proof of possession: hex SHA-256 over the
    /// dedicated verifier chain. One-way, so the server learns nothing about
    /// the key itself.
    pub fn verifier_hash(&self) -> CryptoResult<String> {
        let okm = hkdf_expand(&self.0, &crate::kdf::ZERO_SALT, RECOVERY_VERIFIER_INFO)?;
        Ok(hex::encode(Sha256::digest(okm)))
    }
}

/// Top 10 bits of SHA-256 over the raw key bytes, as two Base32 characters.
fn checksum_chars(key: &[u8; KEY_SIZE]) -> [char; CHECKSUM_CHARS] {
    let h = Sha256::digest(key);
    [
        ALPHABET[(h[0] >> 3) as usize] as char,
        ALPHABET[(((h[0] & 0x07) << 2) | (h[1] >> 6)) as usize] as char,
    ]
}

/// Root SecretKey wrapped under a recovery key, as stored server-side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryWrappedSecretKey {
    #[serde(flatten)]
    pub encrypted: EncryptedData,
    #[serde(with = "crate::hex_bytes")]
    pub hkdf_salt: Vec<u8>,
    pub created_at: i64,
}

/// Wraps the root SecretKey under a recovery key with a fresh HKDF salt.
pub fn wrap_secret_key(
    secret: &SecretKey,
    recovery_key: &RecoveryKey,
) -> CryptoResult<RecoveryWrappedSecretKey> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let kek = AeadKey::from_bytes(hkdf_expand(&recovery_key.0, &salt, RECOVERY_WRAP_INFO)?);
    let encrypted = cipher::wrap_secret_key(secret, &kek)?;

    Ok(RecoveryWrappedSecretKey {
        encrypted,
        hkdf_salt: salt.to_vec(),
        created_at: chrono::Utc::now().timestamp(),
    })
}

/// Recovers the root SecretKey from its recovery-wrapped form.
pub fn unwrap_secret_key(
    wrapped: &RecoveryWrappedSecretKey,
    recovery_key: &RecoveryKey,
) -> CryptoResult<SecretKey> {
    let kek = AeadKey::from_bytes(hkdf_expand(
        &recovery_key.0,
        &wrapped.hkdf_salt,
        RECOVERY_WRAP_INFO,
    )?);
    cipher::unwrap_secret_key(&wrapped.encrypted, &kek)
}
