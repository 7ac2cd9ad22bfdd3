//! Emergency-access grants.
//!
//! A grantee requests access; the owner confirms by escrowing their root
//! SecretKey to the grantee's public key; the grantee later opens the escrow
//! with their own long-term private key. Owner-side confirmation also runs
//! automatically in the background pass, so `confirm` here is the foreground
//! path where errors surface to the caller.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use seclave_crypto::escrow::{self, EcdhKeyPair, EscrowContext};
use seclave_crypto::SecretKey;
use seclave_vault::VaultSession;

use crate::api_client::ApiClient;
use crate::error::CloudResult;
use crate::types::{EmergencyGrantEscrow, PendingGrant};

/// Owner- and grantee-side grant flows.
pub struct EmergencyAccessManager {
    api: Arc<ApiClient>,
    session: Arc<VaultSession>,
}

impl EmergencyAccessManager {
    pub fn new(api: Arc<ApiClient>, session: Arc<VaultSession>) -> Self {
        Self { api, session }
    }

    /// Grantee-side: registers a new grant request with a fresh id and this
    /// grantee's public key.
    pub async fn request_grant(
        &self,
        owner_id: &str,
        grantee_id: &str,
        grantee_public_key_jwk: &str,
    ) -> CloudResult<PendingGrant> {
        let grant = PendingGrant {
            grant_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            grantee_id: grantee_id.to_string(),
            grantee_public_key_jwk: grantee_public_key_jwk.to_string(),
        };
        self.api.create_grant(&grant).await?;
        info!(grant_id = %grant.grant_id, "emergency grant requested");
        Ok(grant)
    }

    /// Owner-side: escrows the root SecretKey to the grantee. Requires an
    /// unlocked vault; a locked session is an error here, unlike in the
    /// background pass.
    pub async fn confirm(&self, grant: &PendingGrant) -> CloudResult<()> {
        let ctx = EscrowContext::emergency(&grant.grant_id, &grant.owner_id, &grant.grantee_id, 1);
        let record = self
            .session
            .escrow_secret_key(&grant.grantee_public_key_jwk, &ctx)?;

        let wire = EmergencyGrantEscrow::from_record(
            &grant.grant_id,
            &grant.owner_id,
            &grant.grantee_id,
            &record,
        );
        self.api.put_grant_escrow(&wire).await?;
        info!(grant_id = %grant.grant_id, "emergency grant confirmed");
        Ok(())
    }

    /// Grantee-side: opens a confirmed escrow with the grantee's own key
    /// pair. `Ok(None)` while the owner has not confirmed yet.
    pub async fn accept(
        &self,
        grant_id: &str,
        keypair: &EcdhKeyPair,
    ) -> CloudResult<Option<SecretKey>> {
        let Some(wire) = self.api.get_grant_escrow(grant_id).await? else {
            return Ok(None);
        };
        let record = wire.to_record()?;
        let secret = escrow::open_secret_key(&record, keypair, &wire.context())?;
        info!(grant_id, "emergency grant accepted");
        Ok(Some(secret))
    }
}
