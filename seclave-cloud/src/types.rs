//! Wire types for the control-plane API.
//!
//! Binary fields travel as hex strings, field names as camelCase. Escrow
//! records convert to and from the crypto layer's [`EscrowRecord`] at this
//! boundary; a record that fails hex decoding is rejected before any key
//! material is touched.

use serde::{Deserialize, Serialize};

use seclave_crypto::escrow::{EscrowContext, EscrowRecord, EscrowScope};
use seclave_crypto::recovery::RecoveryWrappedSecretKey;

use crate::error::{CloudError, CloudResult};

fn decode_hex(field: &str, value: &str) -> CloudResult<Vec<u8>> {
    hex::decode(value).map_err(|e| CloudError::Encoding(format!("{field}: {e}")))
}

/// A team key escrowed to one member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamKeyEscrow {
    pub team_id: String,
    pub to_user_id: String,
    pub encrypted_team_key: String,
    pub iv: String,
    pub auth_tag: String,
    pub ephemeral_public_key: String,
    pub hkdf_salt: String,
    pub key_version: u32,
    pub wrap_version: u32,
}

impl TeamKeyEscrow {
    pub fn from_record(
        team_id: impl Into<String>,
        to_user_id: impl Into<String>,
        record: &EscrowRecord,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            to_user_id: to_user_id.into(),
            encrypted_team_key: hex::encode(&record.ciphertext),
            iv: hex::encode(&record.iv),
            auth_tag: hex::encode(&record.auth_tag),
            ephemeral_public_key: record.ephemeral_public_key.clone(),
            hkdf_salt: hex::encode(&record.hkdf_salt),
            key_version: record.key_version,
            wrap_version: record.wrap_version,
        }
    }

    pub fn to_record(&self) -> CloudResult<EscrowRecord> {
        Ok(EscrowRecord {
            ephemeral_public_key: self.ephemeral_public_key.clone(),
            ciphertext: decode_hex("encryptedTeamKey", &self.encrypted_team_key)?,
            iv: decode_hex("iv", &self.iv)?,
            auth_tag: decode_hex("authTag", &self.auth_tag)?,
            hkdf_salt: decode_hex("hkdfSalt", &self.hkdf_salt)?,
            key_version: self.key_version,
            wrap_version: self.wrap_version,
        })
    }

    /// The AAD context this record was sealed under.
    pub fn context(&self) -> EscrowContext {
        EscrowContext {
            scope: EscrowScope::Team {
                team_id: self.team_id.clone(),
                to_user_id: self.to_user_id.clone(),
            },
            key_version: self.key_version,
            wrap_version: self.wrap_version,
        }
    }
}

/// An owner's root SecretKey escrowed to an emergency-access grantee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyGrantEscrow {
    pub grant_id: String,
    pub owner_id: String,
    pub grantee_id: String,
    pub encrypted_secret_key: String,
    pub iv: String,
    pub auth_tag: String,
    pub ephemeral_public_key: String,
    pub hkdf_salt: String,
    pub key_version: u32,
    pub wrap_version: u32,
}

impl EmergencyGrantEscrow {
    pub fn from_record(
        grant_id: impl Into<String>,
        owner_id: impl Into<String>,
        grantee_id: impl Into<String>,
        record: &EscrowRecord,
    ) -> Self {
        Self {
            grant_id: grant_id.into(),
            owner_id: owner_id.into(),
            grantee_id: grantee_id.into(),
            encrypted_secret_key: hex::encode(&record.ciphertext),
            iv: hex::encode(&record.iv),
            auth_tag: hex::encode(&record.auth_tag),
            ephemeral_public_key: record.ephemeral_public_key.clone(),
            hkdf_salt: hex::encode(&record.hkdf_salt),
            key_version: record.key_version,
            wrap_version: record.wrap_version,
        }
    }

    pub fn to_record(&self) -> CloudResult<EscrowRecord> {
        Ok(EscrowRecord {
            ephemeral_public_key: self.ephemeral_public_key.clone(),
            ciphertext: decode_hex("encryptedSecretKey", &self.encrypted_secret_key)?,
            iv: decode_hex("iv", &self.iv)?,
            auth_tag: decode_hex("authTag", &self.auth_tag)?,
            hkdf_salt: decode_hex("hkdfSalt", &self.hkdf_salt)?,
            key_version: self.key_version,
            wrap_version: self.wrap_version,
        })
    }

    pub fn context(&self) -> EscrowContext {
        EscrowContext {
            scope: EscrowScope::EmergencyGrant {
                grant_id: self.grant_id.clone(),
                owner_id: self.owner_id.clone(),
                grantee_id: self.grantee_id.clone(),
            },
            key_version: self.key_version,
            wrap_version: self.wrap_version,
        }
    }
}

/// A member who has not yet received the current team-key version.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMember {
    pub user_id: String,
    pub public_key_jwk: String,
}

/// Distribution state of one team, as reported by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDistributionStatus {
    pub team_id: String,
    pub key_version: u32,
    pub pending_members: Vec<PendingMember>,
}

/// An emergency-access grant awaiting owner confirmation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGrant {
    pub grant_id: String,
    pub owner_id: String,
    pub grantee_id: String,
    pub grantee_public_key_jwk: String,
}

/// Recovery blob plus verifier hash, as persisted server-side.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryUpload {
    #[serde(flatten)]
    pub wrapped: RecoveryWrappedSecretKey,
    pub verifier_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use seclave_crypto::escrow::{self, EcdhKeyPair};
    use seclave_crypto::TeamKey;

    #[test]
    fn team_escrow_wire_round_trip() {
        let recipient = EcdhKeyPair::generate();
        let team_key = TeamKey::generate();
        let ctx = EscrowContext::team("team-1", "user-2", 3);
        let record = escrow::seal_team_key(&team_key, &recipient.public_key_jwk(), &ctx).unwrap();

        let wire = TeamKeyEscrow::from_record("team-1", "user-2", &record);
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json["encryptedTeamKey"].is_string());
        assert!(json["ephemeralPublicKey"].is_string());
        assert_eq!(json["keyVersion"], 3);

        let parsed: TeamKeyEscrow = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.to_record().unwrap(), record);
        assert_eq!(parsed.context(), ctx);
    }

    #[test]
    fn bad_hex_is_rejected_before_decryption() {
        let wire = TeamKeyEscrow {
            team_id: "t".into(),
            to_user_id: "u".into(),
            encrypted_team_key: "zz".into(),
            iv: String::new(),
            auth_tag: String::new(),
            ephemeral_public_key: String::new(),
            hkdf_salt: String::new(),
            key_version: 1,
            wrap_version: 1,
        };
        assert!(matches!(
            wire.to_record(),
            Err(CloudError::Encoding(_))
        ));
    }
}
