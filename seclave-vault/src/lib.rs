//! Vault session lifecycle.
//!
//! A [`VaultSession`] is the single in-memory holder of the unwrapped root
//! SecretKey. It is created explicitly and injected into whatever needs it —
//! never an ambient singleton. Persistence is an external collaborator: setup
//! and rewrap hand back a [`SetupBundle`] of wire-shaped fields for the caller
//! to store, and unlock consumes an [`UnlockPayload`] fetched by the caller.
//!
//! Background flows hold a shared reference and only ever read the key;
//! `lock()` is the one mutation, and it zeroizes.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use seclave_crypto::escrow::{EcdhKeyPair, EscrowContext, EscrowRecord};
use seclave_crypto::kdf::{self, AccountSalt, AeadKey, SecretKey};
use seclave_crypto::{cipher, escrow, CryptoError, EncryptedData};

mod recovery;

pub use recovery::RecoveryEnrollment;

const MIN_PASSPHRASE_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault is locked")]
    Locked,
    #[error("passphrase too short (min {MIN_PASSPHRASE_LEN} characters)")]
    PassphraseTooShort,
    #[error("invalid passphrase")]
    InvalidPassphrase,
    #[error("malformed unlock payload: {0}")]
    Payload(String),
    #[error(transparent)]
    RecoveryKeyFormat(#[from] seclave_crypto::RecoveryKeyFormatError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Everything the persistence layer must store after setup or rewrap. Binary
/// fields are hex strings per the wire format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupBundle {
    pub account_salt: String,
    pub encrypted_secret_key: String,
    pub secret_key_iv: String,
    pub secret_key_auth_tag: String,
    pub verification_artifact: EncryptedData,
    /// Opaque server-side hash for rate-limiting. Not a vault secret.
    pub auth_hash: String,
}

impl SetupBundle {
    /// The subset a later unlock needs, in the shape the server returns it.
    pub fn unlock_payload(&self) -> UnlockPayload {
        UnlockPayload {
            account_salt: self.account_salt.clone(),
            encrypted_secret_key: self.encrypted_secret_key.clone(),
            secret_key_iv: self.secret_key_iv.clone(),
            secret_key_auth_tag: self.secret_key_auth_tag.clone(),
            verification_artifact: self.verification_artifact.clone(),
        }
    }
}

/// What the server hands back for an unlock attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockPayload {
    pub account_salt: String,
    pub encrypted_secret_key: String,
    pub secret_key_iv: String,
    pub secret_key_auth_tag: String,
    pub verification_artifact: EncryptedData,
}

impl UnlockPayload {
    fn wrapped_secret_key(&self) -> VaultResult<EncryptedData> {
        let decode =
            |field: &str, value: &str| hex::decode(value).map_err(|e| VaultError::Payload(format!("{field}: {e}")));
        Ok(EncryptedData {
            ciphertext: decode("encryptedSecretKey", &self.encrypted_secret_key)?,
            iv: decode("secretKeyIv", &self.secret_key_iv)?,
            tag: decode("secretKeyAuthTag", &self.secret_key_auth_tag)?,
        })
    }
}

/// In-memory session around the unwrapped SecretKey.
pub struct VaultSession {
    secret: RwLock<Option<SecretKey>>,
}

impl Default for VaultSession {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultSession {
    pub fn new() -> Self {
        Self {
            secret: RwLock::new(None),
        }
    }

    /// First-time setup: fresh salt and SecretKey, wrapped under the
    /// passphrase. Leaves the session unlocked and returns everything the
    /// caller must persist.
    pub fn setup(&self, passphrase: &str) -> VaultResult<SetupBundle> {
        if passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(VaultError::PassphraseTooShort);
        }

        let salt = AccountSalt::random();
        let secret = SecretKey::generate();
        let bundle = bundle_for(&secret, passphrase, &salt)?;

        self.install(secret);
        Ok(bundle)
    }

    /// Unlocks from a server payload. The verification artifact proves the
    /// passphrase offline; a wrong passphrase fails before any key is
    /// installed.
    pub fn unlock(&self, passphrase: &str, payload: &UnlockPayload) -> VaultResult<()> {
        let salt = AccountSalt::from_hex(&payload.account_salt)
            .map_err(|e| VaultError::Payload(format!("accountSalt: {e}")))?;
        let wrapped = payload.wrapped_secret_key()?;

        let wrapping_key = kdf::derive_wrapping_key(passphrase, &salt);
        let secret = match cipher::unwrap_secret_key(&wrapped, &wrapping_key) {
            Ok(secret) => secret,
            Err(CryptoError::Decryption) => return Err(VaultError::InvalidPassphrase),
            Err(e) => return Err(e.into()),
        };

        let enc_key = kdf::derive_encryption_key(&secret)?;
        if !cipher::check_verification_artifact(&enc_key, &payload.verification_artifact) {
            return Err(VaultError::InvalidPassphrase);
        }

        self.install(secret);
        Ok(())
    }

    /// Clears the key from memory. Zeroized on drop of the old value.
    pub fn lock(&self) {
        let mut guard = match self.secret.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    pub fn is_unlocked(&self) -> bool {
        self.secret
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Passphrase change: re-wraps the same SecretKey under a new passphrase
    /// with a fresh salt and fresh IVs. Entry ciphertext is untouched since
    /// the SecretKey itself never changes.
    pub fn rewrap(&self, new_passphrase: &str) -> VaultResult<SetupBundle> {
        if new_passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(VaultError::PassphraseTooShort);
        }
        let salt = AccountSalt::random();
        self.with_secret(|secret| bundle_for(secret, new_passphrase, &salt))
    }

    /// AES-GCM key for personal vault ciphertext.
    pub fn encryption_key(&self) -> VaultResult<AeadKey> {
        self.with_secret(|secret| Ok(kdf::derive_encryption_key(secret)?))
    }

    /// Key for wrapping ECDH private keys at rest.
    pub fn ecdh_wrapping_key(&self) -> VaultResult<AeadKey> {
        self.with_secret(|secret| Ok(kdf::derive_ecdh_wrapping_key(secret)?))
    }

    /// Opaque server-facing hash.
    pub fn auth_hash(&self) -> VaultResult<String> {
        self.with_secret(|secret| Ok(kdf::compute_auth_hash(secret)?))
    }

    /// Generates a long-term ECDH key pair for a new scope (team membership
    /// or emergency grantee) and wraps its private half for storage. Returns
    /// the public JWK alongside the wrapped private key.
    pub fn generate_ecdh_keypair(&self) -> VaultResult<(String, EncryptedData)> {
        self.with_secret(|secret| {
            let kek = kdf::derive_ecdh_wrapping_key(secret)?;
            let pair = EcdhKeyPair::generate();
            let wrapped = pair.wrap_private_key(&kek)?;
            Ok((pair.public_key_jwk(), wrapped))
        })
    }

    /// Restores a stored ECDH key pair. Only possible while unlocked.
    pub fn unwrap_ecdh_keypair(&self, wrapped: &EncryptedData) -> VaultResult<EcdhKeyPair> {
        self.with_secret(|secret| {
            let kek = kdf::derive_ecdh_wrapping_key(secret)?;
            Ok(EcdhKeyPair::unwrap_private_key(wrapped, &kek)?)
        })
    }

    /// Escrows this vault's SecretKey to an emergency-access grantee. Raw key
    /// bytes never cross the session boundary.
    pub fn escrow_secret_key(
        &self,
        recipient_jwk: &str,
        context: &EscrowContext,
    ) -> VaultResult<EscrowRecord> {
        self.with_secret(|secret| Ok(escrow::seal_secret_key(secret, recipient_jwk, context)?))
    }

    fn install(&self, secret: SecretKey) {
        let mut guard = match self.secret.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(secret);
    }

    /// Runs a closure against the SecretKey under the read lock, or
    /// [`VaultError::Locked`].
    pub(crate) fn with_secret<T>(
        &self,
        f: impl FnOnce(&SecretKey) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let guard = self.secret.read().map_err(|_| VaultError::Locked)?;
        let secret = guard.as_ref().ok_or(VaultError::Locked)?;
        f(secret)
    }
}

fn bundle_for(secret: &SecretKey, passphrase: &str, salt: &AccountSalt) -> VaultResult<SetupBundle> {
    let wrapping_key = kdf::derive_wrapping_key(passphrase, salt);
    let wrapped = cipher::wrap_secret_key(secret, &wrapping_key)?;

    let enc_key = kdf::derive_encryption_key(secret)?;
    let verification_artifact = cipher::make_verification_artifact(&enc_key)?;
    let auth_hash = kdf::compute_auth_hash(secret)?;

    Ok(SetupBundle {
        account_salt: salt.to_hex(),
        encrypted_secret_key: hex::encode(&wrapped.ciphertext),
        secret_key_iv: hex::encode(&wrapped.iv),
        secret_key_auth_tag: hex::encode(&wrapped.tag),
        verification_artifact,
        auth_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSPHRASE: &str = "correct horse battery staple";

    #[test]
    fn setup_rejects_short_passphrase() {
        let session = VaultSession::new();
        assert!(matches!(
            session.setup("short"),
            Err(VaultError::PassphraseTooShort)
        ));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn accessors_fail_while_locked() {
        let session = VaultSession::new();
        assert!(matches!(session.encryption_key(), Err(VaultError::Locked)));
        assert!(matches!(session.auth_hash(), Err(VaultError::Locked)));
        assert!(matches!(
            session.generate_ecdh_keypair(),
            Err(VaultError::Locked)
        ));
    }

    #[test]
    fn lock_clears_the_session() {
        let session = VaultSession::new();
        session.setup(PASSPHRASE).unwrap();
        assert!(session.is_unlocked());

        session.lock();
        assert!(!session.is_unlocked());
        assert!(matches!(session.encryption_key(), Err(VaultError::Locked)));
    }

    #[test]
    fn unlock_rejects_malformed_payload() {
        let session = VaultSession::new();
        let bundle = session.setup(PASSPHRASE).unwrap();
        session.lock();

        let mut payload = bundle.unlock_payload();
        payload.secret_key_iv = "not hex".into();
        assert!(matches!(
            session.unlock(PASSPHRASE, &payload),
            Err(VaultError::Payload(_))
        ));
    }
}
