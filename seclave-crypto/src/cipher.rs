//! AES-256-GCM authenticated encryption with detached tags.
//!
//! Every encrypt call draws a fresh 96-bit IV. The 128-bit tag travels
//! separately from the ciphertext in the stored representation, and all
//! binary fields serialize as hex. Decryption is atomic: a tag or AAD
//! mismatch yields [`CryptoError::Decryption`] and no plaintext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{AeadKey, SecretKey, KEY_SIZE};

/// Size of the AES-GCM IV in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Known plaintext encrypted at setup so a later unlock can prove the
/// passphrase correct without a server round trip.
pub const VERIFICATION_PLAINTEXT: &[u8] = b"seclave-verification-token-v1";

/// Ciphertext with its IV and detached tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "crate::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub tag: Vec<u8>,
}

/// Encrypts with a fresh random IV.
pub fn encrypt(key: &AeadKey, plaintext: &[u8], aad: Option<&[u8]>) -> CryptoResult<EncryptedData> {
    let mut iv = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(key, plaintext, &iv, aad)
}

/// Deterministic variant taking an explicit IV.
///
/// GCM is only safe while (key, IV) pairs never repeat. Interop and test
/// vectors aside, callers must use [`encrypt`].
pub fn encrypt_with_iv(
    key: &AeadKey,
    plaintext: &[u8],
    iv: &[u8; NONCE_SIZE],
    aad: Option<&[u8]>,
) -> CryptoResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| CryptoError::Encryption(format!("invalid key length: {e}")))?;

    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or(&[]),
    };
    let mut combined = cipher
        .encrypt(Nonce::from_slice(iv), payload)
        .map_err(|e| CryptoError::Encryption(format!("encryption error: {e}")))?;

    let tag = combined.split_off(combined.len() - TAG_SIZE);
    Ok(EncryptedData {
        ciphertext: combined,
        iv: iv.to_vec(),
        tag,
    })
}

/// Decrypts and verifies. The AAD must be byte-identical to the one given at
/// encryption or the call fails closed.
pub fn decrypt(key: &AeadKey, data: &EncryptedData, aad: Option<&[u8]>) -> CryptoResult<Vec<u8>> {
    if data.iv.len() != NONCE_SIZE || data.tag.len() != TAG_SIZE {
        return Err(CryptoError::Decryption);
    }

    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::Decryption)?;

    let mut combined = Vec::with_capacity(data.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&data.ciphertext);
    combined.extend_from_slice(&data.tag);

    let payload = Payload {
        msg: &combined,
        aad: aad.unwrap_or(&[]),
    };
    cipher
        .decrypt(Nonce::from_slice(&data.iv), payload)
        .map_err(|_| CryptoError::Decryption)
}

/// Encrypts a UTF-8 string.
pub fn encrypt_string(key: &AeadKey, plaintext: &str) -> CryptoResult<EncryptedData> {
    encrypt(key, plaintext.as_bytes(), None)
}

/// Decrypts to a UTF-8 string.
pub fn decrypt_string(key: &AeadKey, data: &EncryptedData) -> CryptoResult<String> {
    let plaintext = decrypt(key, data, None)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}

/// Wraps the root SecretKey under a key-encryption key (the passphrase
/// wrapping key or a recovery wrapping key).
pub fn wrap_secret_key(secret: &SecretKey, kek: &AeadKey) -> CryptoResult<EncryptedData> {
    encrypt(kek, secret.bytes(), None)
}

/// Unwraps the root SecretKey. Fails uniformly on a wrong key or tampering.
pub fn unwrap_secret_key(wrapped: &EncryptedData, kek: &AeadKey) -> CryptoResult<SecretKey> {
    let mut plaintext = decrypt(kek, wrapped, None)?;
    if plaintext.len() != KEY_SIZE {
        let actual = plaintext.len();
        plaintext.zeroize();
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual,
        });
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    let secret = SecretKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(secret)
}

/// Encrypts the fixed verification plaintext under a candidate encryption key.
pub fn make_verification_artifact(encryption_key: &AeadKey) -> CryptoResult<EncryptedData> {
    encrypt(encryption_key, VERIFICATION_PLAINTEXT, None)
}

/// Cheap local proof of a correct passphrase: decrypt the artifact and
/// compare against the known plaintext.
pub fn check_verification_artifact(encryption_key: &AeadKey, artifact: &EncryptedData) -> bool {
    matches!(decrypt(encryption_key, artifact, None), Ok(plaintext) if plaintext == VERIFICATION_PLAINTEXT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> AeadKey {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        AeadKey::from_bytes(bytes)
    }

    #[test]
    fn round_trip_bytes_and_string() {
        let key = random_key();

        let data = encrypt(&key, b"attachment bytes", None).unwrap();
        assert_eq!(decrypt(&key, &data, None).unwrap(), b"attachment bytes");

        let text = encrypt_string(&key, "entry text").unwrap();
        assert_eq!(decrypt_string(&key, &text).unwrap(), "entry text");
    }

    #[test]
    fn explicit_iv_is_deterministic_fresh_iv_is_not() {
        let key = random_key();
        let iv = [0xAA; NONCE_SIZE];

        let first = encrypt_with_iv(&key, b"test data", &iv, None).unwrap();
        let second = encrypt_with_iv(&key, b"test data", &iv, None).unwrap();
        assert_eq!(first.ciphertext, second.ciphertext);
        assert_eq!(first.tag, second.tag);

        let a = encrypt(&key, b"test data", None).unwrap();
        let b = encrypt(&key, b"test data", None).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tag_and_ciphertext_tampering_detected() {
        let key = random_key();
        let data = encrypt(&key, b"integrity-protected", None).unwrap();

        let mut bad_ct = data.clone();
        bad_ct.ciphertext[0] ^= 0x01;
        assert!(decrypt(&key, &bad_ct, None).is_err());

        let mut bad_tag = data.clone();
        bad_tag.tag[0] ^= 0x01;
        assert!(decrypt(&key, &bad_tag, None).is_err());
    }

    #[test]
    fn aad_must_match_exactly() {
        let key = random_key();
        let data = encrypt(&key, b"bound", Some(b"context-a")).unwrap();

        assert_eq!(
            decrypt(&key, &data, Some(b"context-a")).unwrap(),
            b"bound"
        );
        assert!(decrypt(&key, &data, Some(b"context-b")).is_err());
        assert!(decrypt(&key, &data, None).is_err());
    }

    #[test]
    fn wrapped_secret_key_round_trip() {
        let kek = random_key();
        let secret = SecretKey::generate();
        let expected = crate::kdf::compute_auth_hash(&secret).unwrap();

        let wrapped = wrap_secret_key(&secret, &kek).unwrap();
        let unwrapped = unwrap_secret_key(&wrapped, &kek).unwrap();
        assert_eq!(crate::kdf::compute_auth_hash(&unwrapped).unwrap(), expected);

        let wrong = random_key();
        assert!(unwrap_secret_key(&wrapped, &wrong).is_err());
    }

    #[test]
    fn verification_artifact_accepts_only_matching_key() {
        let key = random_key();
        let artifact = make_verification_artifact(&key).unwrap();
        assert!(check_verification_artifact(&key, &artifact));
        assert!(!check_verification_artifact(&random_key(), &artifact));
    }

    #[test]
    fn serializes_fields_as_hex() {
        let key = random_key();
        let data = encrypt(&key, b"x", None).unwrap();
        let json = serde_json::to_value(&data).unwrap();

        let iv = json["iv"].as_str().unwrap();
        assert_eq!(iv.len(), NONCE_SIZE * 2);
        assert!(iv.chars().all(|c| c.is_ascii_hexdigit()));

        let parsed: EncryptedData = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, data);
    }
}
