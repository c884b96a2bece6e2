//! Client engines talking through the router.
//!
//! The router only ever sees transport-encoded envelopes; both ends derive
//! the chat key from each other's public key.

use shroud_core::ShroudError;
use shroud_crypto::{CryptoEngine, Envelope, Payload};
use shroud_harness::SimServer;
use shroud_server::{RouteOptions, SessionSeed};

const CHAT: &str = "chat-e2e-00000001";

fn paired_engines() -> (CryptoEngine, CryptoEngine) {
    let mut alice = CryptoEngine::new();
    let mut bob = CryptoEngine::new();
    let alice_public = alice.initialize().unwrap();
    let bob_public = bob.initialize().unwrap();

    let alice_handle = alice.derive_shared_secret(&bob_public, CHAT).unwrap();
    let bob_handle = bob.derive_shared_secret(&alice_public, CHAT).unwrap();
    assert_eq!(alice_handle, bob_handle);

    (alice, bob)
}

#[tokio::test]
async fn message_roundtrip_through_router_then_key_rotation() {
    let server = SimServer::new();
    let sender = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let (mut alice, mut bob) = paired_engines();

    let sealed = alice.encrypt(&Payload::Text("meet at noon".to_string()), CHAT).unwrap();
    let transport = sealed.envelope.to_transport();

    server
        .shroud
        .router
        .route_message(&transport, CHAT, &sender.secondary_id, RouteOptions::default())
        .await
        .unwrap();

    let stored = server.shroud.router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].encrypted_content.contains("noon"));

    let envelope = Envelope::from_transport(&stored[0].encrypted_content).unwrap();
    assert_eq!(bob.decrypt(&envelope, CHAT).unwrap(), Payload::Text("meet at noon".to_string()));

    bob.rotate_keys().unwrap();
    let after_rotation = bob.decrypt(&envelope, CHAT).map_err(ShroudError::from);
    assert!(matches!(after_rotation, Err(ShroudError::KeysNotReady { .. })));
}

#[tokio::test]
async fn tampered_stored_envelope_fails_authentication() {
    let server = SimServer::new();
    let sender = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let (mut alice, bob) = paired_engines();

    let sealed = alice.encrypt(&Payload::Binary(vec![7; 64]), CHAT).unwrap();
    let mut bytes = sealed.envelope.to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = Envelope::from_bytes(&bytes).unwrap().to_transport();

    server
        .shroud
        .router
        .route_message(&tampered, CHAT, &sender.primary_id, RouteOptions::default())
        .await
        .unwrap();

    let stored = server.shroud.router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    let envelope = Envelope::from_transport(&stored[0].encrypted_content).unwrap();

    let result = bob.decrypt(&envelope, CHAT).map_err(ShroudError::from);
    assert_eq!(result, Err(ShroudError::AuthenticationFailure));
}

#[tokio::test]
async fn channel_fan_out_of_encrypted_envelope() {
    let server = SimServer::new();
    let a = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let b = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let (mut alice, bob) = paired_engines();

    let channel = server
        .shroud
        .router
        .create_anonymous_channel(&[a.primary_id.clone(), b.primary_id.clone()])
        .await
        .unwrap();

    let sealed = alice.encrypt(&Payload::Text("hi".to_string()), CHAT).unwrap();
    let delivery = server
        .shroud
        .router
        .route_through_channel(&channel.channel_id, &sealed.envelope.to_transport(), &a.primary_id)
        .await
        .unwrap();
    assert_eq!(delivery.recipient_count, 1);

    let received = server.delivery.delivered_to(&b.primary_id);
    let envelope = Envelope::from_transport(&received[0].envelope).unwrap();
    assert_eq!(bob.decrypt(&envelope, CHAT).unwrap(), Payload::Text("hi".to_string()));
}
