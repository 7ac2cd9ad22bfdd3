//! Recovery-key enrollment and restore.
//!
//! Enrollment re-wraps the session's SecretKey under a freshly generated
//! recovery key and returns the one-time display string; the caller persists
//! the wrapped blob and the verifier hash, and must never store the display
//! string. Restore reverses it after a forgotten passphrase and leaves the
//! session unlocked so the caller can [`rewrap`] under a new passphrase.
//!
//! [`rewrap`]: crate::VaultSession::rewrap

use seclave_crypto::recovery::{self, RecoveryKey, RecoveryWrappedSecretKey};

use crate::{VaultError, VaultResult, VaultSession};

/// Result of recovery enrollment. `display` is shown to the user exactly once
/// and then dropped; the other two fields go to the persistence layer.
pub struct RecoveryEnrollment {
    pub display: String,
    pub wrapped: RecoveryWrappedSecretKey,
    pub verifier_hash: String,
}

impl VaultSession {
    /// Generates a recovery key and wraps the current SecretKey under it.
    pub fn enroll_recovery(&self) -> VaultResult<RecoveryEnrollment> {
        self.with_secret(|secret| {
            let recovery_key = RecoveryKey::generate();
            let wrapped = recovery::wrap_secret_key(secret, &recovery_key)?;
            let verifier_hash = recovery_key.verifier_hash()?;
            Ok(RecoveryEnrollment {
                display: recovery_key.format(),
                wrapped,
                verifier_hash,
            })
        })
    }

    /// Restores the vault from a typed-in recovery key. Parse failures come
    /// back as [`RecoveryKeyFormatError`] variants so the UI can distinguish
    /// a typo from a wrong key; a clean parse with the wrong key fails the
    /// AEAD check uniformly.
    ///
    /// [`RecoveryKeyFormatError`]: seclave_crypto::RecoveryKeyFormatError
    pub fn recover(&self, input: &str, wrapped: &RecoveryWrappedSecretKey) -> VaultResult<()> {
        let recovery_key = RecoveryKey::parse(input)?;
        let secret = recovery::unwrap_secret_key(wrapped, &recovery_key)?;
        self.install(secret);
        Ok(())
    }

    /// Checks a typed-in recovery key against a stored verifier hash without
    /// touching the wrapped blob.
    pub fn verify_recovery_key(&self, input: &str, verifier_hash: &str) -> VaultResult<bool> {
        let recovery_key = RecoveryKey::parse(input)?;
        Ok(recovery_key.verifier_hash()? == verifier_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seclave_crypto::RecoveryKeyFormatError;

    #[test]
    fn enroll_requires_unlock() {
        let session = VaultSession::new();
        assert!(matches!(
            session.enroll_recovery(),
            Err(VaultError::Locked)
        ));
    }

    #[test]
    fn recover_surfaces_format_errors() {
        let session = VaultSession::new();
        session.setup("correct horse battery staple").unwrap();
        let enrollment = session.enroll_recovery().unwrap();
        session.lock();

        let err = session.recover("ABCD-EFGH", &enrollment.wrapped).unwrap_err();
        assert!(matches!(
            err,
            VaultError::RecoveryKeyFormat(RecoveryKeyFormatError::InvalidLength { .. })
        ));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn verifier_hash_matches_only_the_enrolled_key() {
        let session = VaultSession::new();
        session.setup("correct horse battery staple").unwrap();
        let enrollment = session.enroll_recovery().unwrap();

        assert!(session
            .verify_recovery_key(&enrollment.display, &enrollment.verifier_hash)
            .unwrap());

        let other = RecoveryKey::generate();
        assert!(!session
            .verify_recovery_key(&other.format(), &enrollment.verifier_hash)
            .unwrap());
    }
}
