//! ECDH key escrow.
//!
//! One wrap protocol serves two flows: distributing a [`TeamKey`] to a team
//! member, and escrowing the root [`SecretKey`] for an emergency-access
//! grantee. The sender generates an ephemeral P-256 key pair, runs ECDH
//! against the recipient's long-term public key, and expands the shared
//! secret through HKDF-SHA256 with a fresh random salt into a one-shot
//! AES-256-GCM wrap key. The escrow context (who, for what, which versions)
//! is bound into the ciphertext as AAD, so a record replayed under a
//! different grant or recipient fails authentication.

use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::{self, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::hkdf_expand;
use crate::kdf::{AeadKey, SecretKey, TeamKey, KEY_SIZE, SALT_SIZE};

/// Current version of the wrap protocol, recorded per escrow record so old
/// records stay openable after a future format change.
pub const WRAP_VERSION: u32 = 1;

const AAD_FORMAT_VERSION: u8 = 1;
const SCOPE_TEAM: [u8; 2] = *b"TK";
const SCOPE_EMERGENCY: [u8; 2] = *b"EA";
const ESCROW_WRAP_INFO: &[u8] = b"seclave-escrow-wrap";

/// What an escrow record is for. The scope feeds the AAD, never the key
/// derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscrowScope {
    /// Team-key distribution to one member.
    Team { team_id: String, to_user_id: String },
    /// Emergency-access escrow of the owner's root SecretKey.
    EmergencyGrant {
        grant_id: String,
        owner_id: String,
        grantee_id: String,
    },
}

/// Context bound into an escrow record as AAD.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscrowContext {
    pub scope: EscrowScope,
    pub key_version: u32,
    pub wrap_version: u32,
}

impl EscrowContext {
    pub fn team(team_id: impl Into<String>, to_user_id: impl Into<String>, key_version: u32) -> Self {
        Self {
            scope: EscrowScope::Team {
                team_id: team_id.into(),
                to_user_id: to_user_id.into(),
            },
            key_version,
            wrap_version: WRAP_VERSION,
        }
    }

    pub fn emergency(
        grant_id: impl Into<String>,
        owner_id: impl Into<String>,
        grantee_id: impl Into<String>,
        key_version: u32,
    ) -> Self {
        Self {
            scope: EscrowScope::EmergencyGrant {
                grant_id: grant_id.into(),
                owner_id: owner_id.into(),
                grantee_id: grantee_id.into(),
            },
            key_version,
            wrap_version: WRAP_VERSION,
        }
    }

    /// Serializes the context into its canonical AAD layout:
    /// `[2B scope tag][1B format version][1B field count]` followed by each
    /// field as `[2B BE length][UTF-8 bytes]`. Identifier fields come first,
    /// then the decimal key and wrap versions.
    pub fn aad(&self) -> CryptoResult<Vec<u8>> {
        let (tag, mut fields) = match &self.scope {
            EscrowScope::Team { team_id, to_user_id } => {
                (SCOPE_TEAM, vec![team_id.clone(), to_user_id.clone()])
            }
            EscrowScope::EmergencyGrant {
                grant_id,
                owner_id,
                grantee_id,
            } => (
                SCOPE_EMERGENCY,
                vec![grant_id.clone(), owner_id.clone(), grantee_id.clone()],
            ),
        };
        fields.push(self.key_version.to_string());
        fields.push(self.wrap_version.to_string());

        let mut aad = Vec::with_capacity(4 + fields.iter().map(|f| 2 + f.len()).sum::<usize>());
        aad.extend_from_slice(&tag);
        aad.push(AAD_FORMAT_VERSION);
        aad.push(fields.len() as u8);
        for field in &fields {
            let bytes = field.as_bytes();
            let len =
                u16::try_from(bytes.len()).map_err(|_| CryptoError::ContextField(bytes.len()))?;
            aad.extend_from_slice(&len.to_be_bytes());
            aad.extend_from_slice(bytes);
        }
        Ok(aad)
    }
}

/// One wrapped key for one recipient, as stored and transmitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    /// Sender's ephemeral public key as a JWK string.
    pub ephemeral_public_key: String,
    #[serde(with = "crate::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub auth_tag: Vec<u8>,
    #[serde(with = "crate::hex_bytes")]
    pub hkdf_salt: Vec<u8>,
    pub key_version: u32,
    pub wrap_version: u32,
}

/// Long-term P-256 key pair for receiving escrowed keys. The private half is
/// persisted only wrapped under the ECDH-at-rest purpose key.
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: p256::SecretKey,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: p256::SecretKey::random(&mut OsRng),
        }
    }

    /// Public half as a JWK string, the form the server stores and hands to
    /// senders.
    pub fn public_key_jwk(&self) -> String {
        self.secret.public_key().to_jwk_string().to_string()
    }

    /// Wraps the private key (PKCS#8 DER) under the ECDH-at-rest key.
    pub fn wrap_private_key(&self, kek: &AeadKey) -> CryptoResult<EncryptedData> {
        let der = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyFormat(format!("PKCS#8 encoding failed: {e}")))?;
        cipher::encrypt(kek, der.as_bytes(), None)
    }

    /// Unwraps a private key previously stored with [`wrap_private_key`].
    ///
    /// [`wrap_private_key`]: Self::wrap_private_key
    pub fn unwrap_private_key(wrapped: &EncryptedData, kek: &AeadKey) -> CryptoResult<Self> {
        let der = Zeroizing::new(cipher::decrypt(kek, wrapped, None)?);
        let secret = p256::SecretKey::from_pkcs8_der(&der)
            .map_err(|e| CryptoError::KeyFormat(format!("PKCS#8 decoding failed: {e}")))?;
        Ok(Self { secret })
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EcdhKeyPair(..)")
    }
}

/// Runs ECDH between an own long-term private key and a peer's JWK public
/// key, then HKDF-expands the shared secret with the record's salt into the
/// wrap key. Both sides of an escrow arrive at the same key.
pub fn agree_wrap_key(own: &EcdhKeyPair, peer_jwk: &str, salt: &[u8]) -> CryptoResult<AeadKey> {
    let peer = parse_jwk(peer_jwk)?;
    let shared = p256::ecdh::diffie_hellman(own.secret.to_nonzero_scalar(), peer.as_affine());
    let okm = hkdf_expand(shared.raw_secret_bytes().as_slice(), salt, ESCROW_WRAP_INFO)?;
    Ok(AeadKey::from_bytes(okm))
}

/// Escrows a team key for one recipient.
pub fn seal_team_key(
    team_key: &TeamKey,
    recipient_jwk: &str,
    context: &EscrowContext,
) -> CryptoResult<EscrowRecord> {
    seal(team_key.bytes(), recipient_jwk, context)
}

/// Opens a team-key escrow record addressed to this key pair.
pub fn open_team_key(
    record: &EscrowRecord,
    own: &EcdhKeyPair,
    context: &EscrowContext,
) -> CryptoResult<TeamKey> {
    let bytes = open(record, own, context)?;
    Ok(TeamKey::from_bytes(*bytes))
}

/// Escrows the root SecretKey for an emergency-access grantee.
pub fn seal_secret_key(
    secret: &SecretKey,
    recipient_jwk: &str,
    context: &EscrowContext,
) -> CryptoResult<EscrowRecord> {
    seal(secret.bytes(), recipient_jwk, context)
}

/// Opens an escrowed root SecretKey as the grantee.
pub fn open_secret_key(
    record: &EscrowRecord,
    own: &EcdhKeyPair,
    context: &EscrowContext,
) -> CryptoResult<SecretKey> {
    let bytes = open(record, own, context)?;
    Ok(SecretKey::from_bytes(*bytes))
}

fn seal(
    payload: &[u8; KEY_SIZE],
    recipient_jwk: &str,
    context: &EscrowContext,
) -> CryptoResult<EscrowRecord> {
    let recipient = parse_jwk(recipient_jwk)?;

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(&recipient);
    let wrap_key = AeadKey::from_bytes(hkdf_expand(
        shared.raw_secret_bytes().as_slice(),
        &salt,
        ESCROW_WRAP_INFO,
    )?);

    let aad = context.aad()?;
    let encrypted = cipher::encrypt(&wrap_key, payload, Some(&aad))?;

    Ok(EscrowRecord {
        ephemeral_public_key: ephemeral_public.to_jwk_string().to_string(),
        ciphertext: encrypted.ciphertext,
        iv: encrypted.iv,
        auth_tag: encrypted.tag,
        hkdf_salt: salt.to_vec(),
        key_version: context.key_version,
        wrap_version: context.wrap_version,
    })
}

fn open(
    record: &EscrowRecord,
    own: &EcdhKeyPair,
    context: &EscrowContext,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let wrap_key = agree_wrap_key(own, &record.ephemeral_public_key, &record.hkdf_salt)?;

    let data = EncryptedData {
        ciphertext: record.ciphertext.clone(),
        iv: record.iv.clone(),
        tag: record.auth_tag.clone(),
    };
    let aad = context.aad()?;
    let plaintext = Zeroizing::new(cipher::decrypt(&wrap_key, &data, Some(&aad))?);
    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&plaintext);
    Ok(bytes)
}

fn parse_jwk(jwk: &str) -> CryptoResult<PublicKey> {
    PublicKey::from_jwk_str(jwk).map_err(|e| CryptoError::KeyFormat(format!("invalid JWK: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf;

    #[test]
    fn team_key_escrow_round_trip() {
        let recipient = EcdhKeyPair::generate();
        let team_key = TeamKey::generate();
        let expected = kdf::derive_team_encryption_key(&team_key).unwrap();
        let ctx = EscrowContext::team("team-1", "user-2", 3);

        let record = seal_team_key(&team_key, &recipient.public_key_jwk(), &ctx).unwrap();
        assert_eq!(record.key_version, 3);
        assert_eq!(record.wrap_version, WRAP_VERSION);

        let opened = open_team_key(&record, &recipient, &ctx).unwrap();
        assert_eq!(kdf::derive_team_encryption_key(&opened).unwrap(), expected);
    }

    #[test]
    fn secret_key_escrow_round_trip() {
        let grantee = EcdhKeyPair::generate();
        let secret = SecretKey::generate();
        let expected = kdf::compute_auth_hash(&secret).unwrap();
        let ctx = EscrowContext::emergency("grant-9", "owner-1", "grantee-2", 1);

        let record = seal_secret_key(&secret, &grantee.public_key_jwk(), &ctx).unwrap();
        let opened = open_secret_key(&record, &grantee, &ctx).unwrap();
        assert_eq!(kdf::compute_auth_hash(&opened).unwrap(), expected);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = EcdhKeyPair::generate();
        let interloper = EcdhKeyPair::generate();
        let team_key = TeamKey::generate();
        let ctx = EscrowContext::team("team-1", "user-2", 1);

        let record = seal_team_key(&team_key, &recipient.public_key_jwk(), &ctx).unwrap();
        assert!(open_team_key(&record, &interloper, &ctx).is_err());
    }

    #[test]
    fn context_mismatch_fails_authentication() {
        let recipient = EcdhKeyPair::generate();
        let team_key = TeamKey::generate();
        let ctx = EscrowContext::team("team-1", "user-2", 1);
        let record = seal_team_key(&team_key, &recipient.public_key_jwk(), &ctx).unwrap();

        // Different recipient id.
        let other_user = EscrowContext::team("team-1", "user-3", 1);
        assert!(open_team_key(&record, &recipient, &other_user).is_err());

        // Different key version.
        let other_version = EscrowContext::team("team-1", "user-2", 2);
        assert!(open_team_key(&record, &recipient, &other_version).is_err());

        // Team record replayed as an emergency escrow.
        let as_grant = EscrowContext::emergency("team-1", "user-2", "x", 1);
        assert!(open_team_key(&record, &recipient, &as_grant).is_err());
    }

    #[test]
    fn both_sides_agree_on_the_wrap_key() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let salt = [0x42u8; SALT_SIZE];

        let from_alice = agree_wrap_key(&alice, &bob.public_key_jwk(), &salt).unwrap();
        let from_bob = agree_wrap_key(&bob, &alice.public_key_jwk(), &salt).unwrap();
        assert_eq!(from_alice, from_bob);

        let other_salt = [0x43u8; SALT_SIZE];
        let rekeyed = agree_wrap_key(&alice, &bob.public_key_jwk(), &other_salt).unwrap();
        assert_ne!(from_alice, rekeyed);
    }

    #[test]
    fn private_key_wrap_round_trip() {
        let pair = EcdhKeyPair::generate();
        let secret = SecretKey::generate();
        let kek = kdf::derive_ecdh_wrapping_key(&secret).unwrap();

        let wrapped = pair.wrap_private_key(&kek).unwrap();
        let restored = EcdhKeyPair::unwrap_private_key(&wrapped, &kek).unwrap();
        assert_eq!(pair.public_key_jwk(), restored.public_key_jwk());

        let wrong = kdf::derive_encryption_key(&secret).unwrap();
        assert!(EcdhKeyPair::unwrap_private_key(&wrapped, &wrong).is_err());
    }

    #[test]
    fn aad_layout_is_stable() {
        let ctx = EscrowContext::team("t", "u", 7);
        let aad = ctx.aad().unwrap();

        let expected: Vec<u8> = [
            b"TK".as_slice(),
            &[AAD_FORMAT_VERSION, 4],
            &[0, 1], b"t",
            &[0, 1], b"u",
            &[0, 1], b"7",
            &[0, 1], b"1",
        ]
        .concat();
        assert_eq!(aad, expected);
    }

    #[test]
    fn escrow_record_serializes_camel_case() {
        let recipient = EcdhKeyPair::generate();
        let team_key = TeamKey::generate();
        let ctx = EscrowContext::team("team-1", "user-2", 1);
        let record = seal_team_key(&team_key, &recipient.public_key_jwk(), &ctx).unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["ephemeralPublicKey"].is_string());
        assert!(json["authTag"].is_string());
        assert!(json["hkdfSalt"].is_string());
        assert_eq!(json["wrapVersion"], WRAP_VERSION);
    }
}
