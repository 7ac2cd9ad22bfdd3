//! Background distribution engine.
//!
//! Runs a distribution pass at start, on a fixed interval, and on demand
//! (tab focus, network reconnect). A pass re-escrows team keys to members
//! still pending distribution and confirms pending emergency-access grants.
//! Distribution is best-effort and eventually consistent: per-team and
//! per-member failures are logged and retried next cycle, never propagated.
//! An in-flight flag keeps passes from ever overlapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use seclave_crypto::escrow::{self, EscrowContext};
use seclave_vault::{VaultError, VaultSession};

use crate::api_client::ApiClient;
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::team_keys::TeamKeyService;
use crate::types::{EmergencyGrantEscrow, TeamKeyEscrow};

/// Commands accepted by the running engine.
#[derive(Debug)]
pub enum DistributionCommand {
    Stop,
    /// Immediate pass, for visibility-regain and reconnect events.
    RunNow,
}

/// Handle for controlling a running [`DistributionEngine`].
#[derive(Clone)]
pub struct DistributionHandle {
    command_tx: mpsc::Sender<DistributionCommand>,
}

impl DistributionHandle {
    pub async fn stop(&self) -> CloudResult<()> {
        self.command_tx
            .send(DistributionCommand::Stop)
            .await
            .map_err(|_| CloudError::Api("distribution engine not running".to_string()))
    }

    pub async fn run_now(&self) -> CloudResult<()> {
        self.command_tx
            .send(DistributionCommand::RunNow)
            .await
            .map_err(|_| CloudError::Api("distribution engine not running".to_string()))
    }
}

/// Periodic distribution loop over teams and pending grants.
pub struct DistributionEngine {
    api: Arc<ApiClient>,
    session: Arc<VaultSession>,
    team_keys: Arc<TeamKeyService>,
    command_rx: mpsc::Receiver<DistributionCommand>,
    interval: Duration,
    in_flight: AtomicBool,
}

/// Creates a distribution engine and its command handle.
pub fn create_distribution_engine(
    api: Arc<ApiClient>,
    session: Arc<VaultSession>,
    team_keys: Arc<TeamKeyService>,
    config: &CloudConfig,
) -> (DistributionHandle, DistributionEngine) {
    let (command_tx, command_rx) = mpsc::channel(16);

    let handle = DistributionHandle { command_tx };
    let engine = DistributionEngine {
        api,
        session,
        team_keys,
        command_rx,
        interval: Duration::from_secs(config.distribution_interval_secs),
        in_flight: AtomicBool::new(false),
    };

    (handle, engine)
}

impl DistributionEngine {
    /// Runs the engine loop until stopped or the handle is dropped.
    pub async fn run(&mut self) {
        info!("distribution engine started");

        let mut tick = tokio::time::interval(self.interval);
        // Consume the immediate first tick; the start-of-run pass below
        // covers it.
        tick.tick().await;

        self.run_pass().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_pass().await;
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DistributionCommand::RunNow) => {
                            self.run_pass().await;
                        }
                        Some(DistributionCommand::Stop) => {
                            info!("distribution engine stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping distribution engine");
                            break;
                        }
                    }
                }
            }
        }

        info!("distribution engine stopped");
    }

    /// One best-effort pass. Skipped entirely when another pass is still in
    /// flight.
    pub async fn run_pass(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("distribution pass already in flight, skipping");
            return;
        }

        if let Err(e) = self.distribute_team_keys().await {
            warn!("team key distribution failed, retrying next cycle: {e}");
        }
        if let Err(e) = self.confirm_pending_grants().await {
            warn!("grant confirmation failed, retrying next cycle: {e}");
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn distribute_team_keys(&self) -> CloudResult<()> {
        let teams = self.api.list_distributable_teams().await?;
        if teams.is_empty() {
            return Ok(());
        }
        debug!(count = teams.len(), "teams with pending distribution");

        for team in teams {
            // Own unwrap always precedes member re-wraps. The raw TeamKey is
            // dropped (and zeroized) at the end of each team's iteration.
            let (team_key, key_version) = match self.team_keys.own_team_key(&team.team_id).await {
                Ok(Some(opened)) => opened,
                Ok(None) => {
                    debug!(team_id = %team.team_id, "own key unavailable, deferring");
                    continue;
                }
                Err(e) => {
                    warn!(team_id = %team.team_id, "could not unwrap own team key: {e}");
                    continue;
                }
            };

            for member in &team.pending_members {
                let ctx = EscrowContext::team(&team.team_id, &member.user_id, key_version);
                let record = match escrow::seal_team_key(&team_key, &member.public_key_jwk, &ctx) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(
                            team_id = %team.team_id,
                            user_id = %member.user_id,
                            "sealing team key failed: {e}"
                        );
                        continue;
                    }
                };

                let wire = TeamKeyEscrow::from_record(&team.team_id, &member.user_id, &record);
                if let Err(e) = self.api.put_member_escrow(&wire).await {
                    warn!(
                        team_id = %team.team_id,
                        user_id = %member.user_id,
                        "uploading member escrow failed: {e}"
                    );
                } else {
                    debug!(
                        team_id = %team.team_id,
                        user_id = %member.user_id,
                        key_version,
                        "team key escrowed to member"
                    );
                }
            }
        }
        Ok(())
    }

    async fn confirm_pending_grants(&self) -> CloudResult<()> {
        let grants = self.api.list_pending_grants().await?;

        for grant in grants {
            let ctx = EscrowContext::emergency(&grant.grant_id, &grant.owner_id, &grant.grantee_id, 1);
            let record = match self
                .session
                .escrow_secret_key(&grant.grantee_public_key_jwk, &ctx)
            {
                Ok(record) => record,
                Err(VaultError::Locked) => {
                    debug!("vault locked, deferring grant confirmations");
                    return Ok(());
                }
                Err(e) => {
                    warn!(grant_id = %grant.grant_id, "sealing grant escrow failed: {e}");
                    continue;
                }
            };

            let wire = EmergencyGrantEscrow::from_record(
                &grant.grant_id,
                &grant.owner_id,
                &grant.grantee_id,
                &record,
            );
            if let Err(e) = self.api.put_grant_escrow(&wire).await {
                warn!(grant_id = %grant.grant_id, "uploading grant escrow failed: {e}");
            } else {
                info!(grant_id = %grant.grant_id, "emergency grant confirmed");
            }
        }
        Ok(())
    }
}
