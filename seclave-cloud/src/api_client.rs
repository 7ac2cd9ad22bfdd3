//! HTTP client for the key-management control plane.
//!
//! Thin JSON-over-reqwest layer with bearer-token auth. The server only ever
//! sees ciphertext, wrapped keys, public JWKs and opaque hashes; nothing in
//! this module touches plaintext key material.

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::*;

use seclave_vault::{SetupBundle, UnlockPayload};

/// HTTP client for the Seclave control plane.
pub struct ApiClient {
    client: Client,
    config: CloudConfig,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(config: CloudConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            config,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets the bearer token (from whatever auth flow the host app runs).
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn bearer(&self) -> CloudResult<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or(CloudError::AuthRequired)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    // ── Vault keys ──

    /// Fetches the unlock payload for the authenticated account.
    pub async fn fetch_unlock_payload(&self) -> CloudResult<UnlockPayload> {
        let token = self.bearer().await?;
        let payload = self
            .client
            .get(self.url("/api/vault/keys"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("fetch unlock payload: {e}")))?
            .json()
            .await?;
        Ok(payload)
    }

    /// Persists the setup bundle after first-time setup or a rewrap.
    pub async fn persist_setup(&self, bundle: &SetupBundle) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .put(self.url("/api/vault/keys"))
            .bearer_auth(token)
            .json(bundle)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("persist setup: {e}")))?;
        debug!("setup bundle persisted");
        Ok(())
    }

    /// Submits the opaque auth hash for server-side rate-limiting.
    pub async fn submit_auth_hash(&self, auth_hash: &str) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .post(self.url("/api/vault/auth-hash"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "authHash": auth_hash }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("submit auth hash: {e}")))?;
        Ok(())
    }

    /// Best-effort variant: the hash only feeds rate-limiting, so a failed
    /// submission is logged and dropped.
    pub async fn submit_auth_hash_best_effort(&self, auth_hash: &str) {
        if let Err(e) = self.submit_auth_hash(auth_hash).await {
            warn!("auth hash submission failed: {e}");
        }
    }

    /// Persists the recovery blob and verifier hash.
    pub async fn persist_recovery(&self, upload: &RecoveryUpload) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .put(self.url("/api/vault/recovery"))
            .bearer_auth(token)
            .json(upload)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("persist recovery: {e}")))?;
        Ok(())
    }

    // ── Team keys ──

    /// Fetches the caller's own escrow record for a team, or `None` if no
    /// copy has been escrowed to them yet.
    pub async fn get_own_team_escrow(&self, team_id: &str) -> CloudResult<Option<TeamKeyEscrow>> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.url(&format!("/api/teams/{team_id}/escrow")))
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let escrow = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("get team escrow: {e}")))?
            .json()
            .await?;
        Ok(Some(escrow))
    }

    /// Uploads a freshly sealed escrow record for one member.
    pub async fn put_member_escrow(&self, escrow: &TeamKeyEscrow) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .put(self.url(&format!(
                "/api/teams/{}/members/{}/escrow",
                escrow.team_id, escrow.to_user_id
            )))
            .bearer_auth(token)
            .json(escrow)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("put member escrow: {e}")))?;
        Ok(())
    }

    /// Teams where the caller holds the key and members are still pending
    /// distribution.
    pub async fn list_distributable_teams(&self) -> CloudResult<Vec<TeamDistributionStatus>> {
        let token = self.bearer().await?;
        let teams = self
            .client
            .get(self.url("/api/teams/distribution"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("list distributable teams: {e}")))?
            .json()
            .await?;
        Ok(teams)
    }

    // ── Emergency grants ──

    pub async fn create_grant(&self, grant: &PendingGrant) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .post(self.url("/api/grants"))
            .bearer_auth(token)
            .json(grant)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("create grant: {e}")))?;
        Ok(())
    }

    /// Grants awaiting confirmation where the caller is the owner.
    pub async fn list_pending_grants(&self) -> CloudResult<Vec<PendingGrant>> {
        let token = self.bearer().await?;
        let grants = self
            .client
            .get(self.url("/api/grants/pending"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("list pending grants: {e}")))?
            .json()
            .await?;
        Ok(grants)
    }

    pub async fn put_grant_escrow(&self, escrow: &EmergencyGrantEscrow) -> CloudResult<()> {
        let token = self.bearer().await?;
        self.client
            .put(self.url(&format!("/api/grants/{}/escrow", escrow.grant_id)))
            .bearer_auth(token)
            .json(escrow)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("put grant escrow: {e}")))?;
        Ok(())
    }

    /// Fetches a confirmed grant escrow as the grantee, or `None` while the
    /// owner has not confirmed yet.
    pub async fn get_grant_escrow(
        &self,
        grant_id: &str,
    ) -> CloudResult<Option<EmergencyGrantEscrow>> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.url(&format!("/api/grants/{grant_id}/escrow")))
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let escrow = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(format!("get grant escrow: {e}")))?
            .json()
            .await?;
        Ok(Some(escrow))
    }
}
