mod support;

use seclave_cloud::{EmergencyAccessManager, EmergencyGrantEscrow};
use seclave_crypto::escrow::EcdhKeyPair;
use seclave_crypto::{cipher, derive_encryption_key};
use support::{authed_client, unlocked_session};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn request_registers_a_fresh_grant_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/grants"))
        .and(body_partial_json(serde_json::json!({
            "ownerId": "owner-a",
            "granteeId": "grantee-b",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let manager = EmergencyAccessManager::new(authed_client(&server).await, unlocked_session());
    let keypair = EcdhKeyPair::generate();

    let first = manager
        .request_grant("owner-a", "grantee-b", &keypair.public_key_jwk())
        .await
        .unwrap();
    let second = manager
        .request_grant("owner-a", "grantee-b", &keypair.public_key_jwk())
        .await
        .unwrap();
    assert_ne!(first.grant_id, second.grant_id);
}

#[tokio::test]
async fn owner_confirm_then_grantee_accept() {
    let owner_session = unlocked_session();
    let entry = cipher::encrypt_string(
        &owner_session.encryption_key().unwrap(),
        "handed to the grantee",
    )
    .unwrap();

    let grantee_keypair = EcdhKeyPair::generate();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/grants"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = authed_client(&server).await;
    let owner_manager = EmergencyAccessManager::new(client.clone(), owner_session);

    let grant = owner_manager
        .request_grant("owner-a", "grantee-b", &grantee_keypair.public_key_jwk())
        .await
        .unwrap();
    owner_manager.confirm(&grant).await.unwrap();

    // Replay what the owner uploaded as the server's answer to the grantee.
    let uploaded = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "PUT")
        .expect("grant escrow was uploaded");
    let wire: EmergencyGrantEscrow = serde_json::from_slice(&uploaded.body).unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/api/grants/{}/escrow", grant.grant_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(&wire))
        .mount(&server)
        .await;

    let grantee_manager = EmergencyAccessManager::new(client, unlocked_session());
    let secret = grantee_manager
        .accept(&grant.grant_id, &grantee_keypair)
        .await
        .unwrap()
        .expect("grant was confirmed");

    let key = derive_encryption_key(&secret).unwrap();
    assert_eq!(
        cipher::decrypt_string(&key, &entry).unwrap(),
        "handed to the grantee"
    );
}

#[tokio::test]
async fn accept_before_confirmation_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/grants/grant-x/escrow"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let manager = EmergencyAccessManager::new(authed_client(&server).await, unlocked_session());
    let keypair = EcdhKeyPair::generate();
    assert!(manager
        .accept("grant-x", &keypair)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn confirm_requires_an_unlocked_vault() {
    let server = MockServer::start().await;
    let manager = EmergencyAccessManager::new(
        authed_client(&server).await,
        std::sync::Arc::new(seclave_vault::VaultSession::new()),
    );
    let keypair = EcdhKeyPair::generate();

    let grant = seclave_cloud::PendingGrant {
        grant_id: "grant-1".into(),
        owner_id: "owner-a".into(),
        grantee_id: "grantee-b".into(),
        grantee_public_key_jwk: keypair.public_key_jwk(),
    };
    assert!(manager.confirm(&grant).await.is_err());
}
