//! Team key cache.
//!
//! In-memory map of team id to derived TeamEncryptionKey with a soft TTL.
//! A stale entry triggers a re-fetch of the caller's own escrow record,
//! which unconditionally replaces the cached entry — the latest
//! server-provided wrap always wins, with no local version negotiation.
//!
//! A locked vault or missing ECDH key pair is an expected transient state,
//! not an error: lookups return `Ok(None)` and the caller moves on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use seclave_crypto::escrow::{self, EcdhKeyPair};
use seclave_crypto::kdf::{derive_team_encryption_key, AeadKey, TeamKey};

use crate::api_client::ApiClient;
use crate::config::CloudConfig;
use crate::error::CloudResult;

struct CachedKey {
    key: AeadKey,
    key_version: u32,
    fetched_at: Instant,
}

/// Cache and fetch path for team encryption keys.
pub struct TeamKeyService {
    api: Arc<ApiClient>,
    keypair: RwLock<Option<EcdhKeyPair>>,
    cache: RwLock<HashMap<String, CachedKey>>,
    ttl: Duration,
}

impl TeamKeyService {
    pub fn new(api: Arc<ApiClient>, config: &CloudConfig) -> Self {
        Self {
            api,
            keypair: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.team_key_ttl_secs),
        }
    }

    /// Installs the caller's ECDH key pair after unlock. Until this is
    /// called, every lookup reports missing key material.
    pub async fn install_keypair(&self, keypair: EcdhKeyPair) {
        *self.keypair.write().await = Some(keypair);
    }

    /// Drops the key pair and every cached entry. Called on lock.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
        *self.keypair.write().await = None;
    }

    /// The TeamEncryptionKey for a team: served from cache while younger
    /// than the TTL, otherwise re-fetched from the caller's own escrow.
    /// `Ok(None)` when no key material is available (locked, no key pair,
    /// or no escrow addressed to this user yet).
    pub async fn team_encryption_key(&self, team_id: &str) -> CloudResult<Option<AeadKey>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(team_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(Some(entry.key.clone()));
                }
                debug!(team_id, "cached team key expired, re-fetching");
            }
        }

        let Some((team_key, key_version)) = self.own_team_key(team_id).await? else {
            return Ok(None);
        };
        let key = derive_team_encryption_key(&team_key)?;

        let mut cache = self.cache.write().await;
        cache.insert(
            team_id.to_string(),
            CachedKey {
                key: key.clone(),
                key_version,
                fetched_at: Instant::now(),
            },
        );
        Ok(Some(key))
    }

    /// The key version currently cached for a team, if any.
    pub async fn cached_version(&self, team_id: &str) -> Option<u32> {
        self.cache.read().await.get(team_id).map(|e| e.key_version)
    }

    /// Fetches and opens the caller's own escrow record for a team,
    /// returning the raw TeamKey and its version. Used by lookups and by the
    /// distribution engine, which re-wraps the key for pending members.
    pub async fn own_team_key(&self, team_id: &str) -> CloudResult<Option<(TeamKey, u32)>> {
        let keypair = {
            let guard = self.keypair.read().await;
            match guard.as_ref() {
                Some(pair) => pair.clone(),
                None => {
                    debug!(team_id, "no ECDH key pair installed, skipping fetch");
                    return Ok(None);
                }
            }
        };

        let Some(wire) = self.api.get_own_team_escrow(team_id).await? else {
            debug!(team_id, "no escrow record for this user yet");
            return Ok(None);
        };

        let record = wire.to_record()?;
        let team_key = escrow::open_team_key(&record, &keypair, &wire.context())?;
        Ok(Some((team_key, wire.key_version)))
    }
}
