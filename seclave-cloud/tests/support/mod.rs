//! Shared helpers for integration tests against a wiremock control plane.

use std::sync::Arc;

use seclave_cloud::{ApiClient, CloudConfig, TeamKeyEscrow};
use seclave_crypto::escrow::{self, EcdhKeyPair, EscrowContext};
use seclave_crypto::kdf::{derive_team_encryption_key, AeadKey, TeamKey};
use seclave_vault::VaultSession;
use wiremock::MockServer;

pub const PASSPHRASE: &str = "correct horse battery staple";

pub fn test_config(server: &MockServer) -> CloudConfig {
    CloudConfig {
        api_base_url: server.uri(),
        ..CloudConfig::default()
    }
}

/// Routes engine logs through the test harness when RUST_LOG asks for them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An ApiClient pointing at the mock server with a token already set.
pub async fn authed_client(server: &MockServer) -> Arc<ApiClient> {
    init_tracing();
    let client = ApiClient::new(test_config(server));
    client.set_token("test-token".into()).await;
    Arc::new(client)
}

/// A freshly set-up, unlocked session.
pub fn unlocked_session() -> Arc<VaultSession> {
    let session = VaultSession::new();
    session.setup(PASSPHRASE).expect("setup must succeed");
    Arc::new(session)
}

/// Seals a fresh TeamKey to `keypair` and returns the wire record plus the
/// TeamEncryptionKey the recipient should end up with.
pub fn seeded_team_escrow(
    team_id: &str,
    user_id: &str,
    keypair: &EcdhKeyPair,
    key_version: u32,
) -> (AeadKey, TeamKeyEscrow) {
    let team_key = TeamKey::generate();
    let expected = derive_team_encryption_key(&team_key).expect("derivation must succeed");

    let ctx = EscrowContext::team(team_id, user_id, key_version);
    let record = escrow::seal_team_key(&team_key, &keypair.public_key_jwk(), &ctx)
        .expect("sealing must succeed");

    (expected, TeamKeyEscrow::from_record(team_id, user_id, &record))
}
