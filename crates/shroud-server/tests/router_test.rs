//! Message routing and the leakage scan.

use std::{collections::BTreeSet, time::Duration};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use shroud_core::{ResourceKind, ShroudError};
use shroud_harness::{SIM_EPOCH_MS, SimEnv, SimServer};
use shroud_server::{
    Backends, ChaoticStore, ExpiringStore, MemoryMailbox, MemoryMessageStore, MemoryStore,
    MessageStore, MessageType, RouteOptions, ScanPolicy, ServerConfig, SessionSeed, Shroud,
    router::RoutingRecord, storage::decode,
};
use tokio::task::JoinSet;

const CHAT: &str = "chat-router-0001";
const ENVELOPE: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

fn extensions(value: Value) -> Map<String, Value> {
    let Value::Object(map) = value else {
        unreachable!("literal is an object");
    };
    map
}

fn deny_list_server() -> SimServer {
    let mut config = ServerConfig::default();
    config.router.scan_policy = ScanPolicy::DenyList;
    SimServer::with_config(0, config)
}

#[tokio::test]
async fn routed_message_is_minimal_and_counted() {
    let server = SimServer::new();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    let routed = server
        .shroud
        .router
        .route_message(ENVELOPE, CHAT, &created.secondary_id, RouteOptions::default())
        .await
        .unwrap();

    assert!(routed.routed);
    assert!(routed.message_id.starts_with("msg_"));
    assert_eq!(routed.message_id.len(), 4 + 32);
    assert_eq!(routed.timestamp, SIM_EPOCH_MS);

    let messages = server.shroud.router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        serde_json::to_value(&messages[0]).unwrap(),
        json!({
            "id": routed.message_id,
            "chatId": CHAT,
            "encryptedContent": ENVELOPE,
            "messageType": "text",
            "timestamp": SIM_EPOCH_MS,
            "size": ENVELOPE.len(),
        })
    );

    let session = server.shroud.sessions.resolve(&created.primary_id).await.unwrap();
    assert_eq!(session.message_count, 1);

    let stats = server.shroud.router.routing_stats().await.unwrap();
    assert_eq!((stats.active_chats, stats.indexed_messages), (1, 1));
}

#[tokio::test]
async fn forbidden_extension_is_rejected_and_not_persisted() {
    let server = deny_list_server();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    let options = RouteOptions {
        message_type: MessageType::Text,
        extensions: extensions(json!({"ip_address": "203.0.113.7"})),
    };
    let result =
        server.shroud.router.route_message(ENVELOPE, CHAT, &created.primary_id, options).await;

    assert_eq!(result, Err(ShroudError::LeakageDetected { field: "ip_address".to_string() }));
    assert!(result.unwrap_err().is_security_event());
    assert_eq!(server.messages.message_count(), 0);

    let session = server.shroud.sessions.resolve(&created.primary_id).await.unwrap();
    assert_eq!(session.message_count, 0);
}

#[tokio::test]
async fn nested_forbidden_extension_is_rejected() {
    let server = deny_list_server();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    let options = RouteOptions {
        message_type: MessageType::Image,
        extensions: extensions(json!({"attachment": {"meta": [{"gpsLatitude": 1.5}]}})),
    };
    let result =
        server.shroud.router.route_message(ENVELOPE, CHAT, &created.primary_id, options).await;

    assert_eq!(result, Err(ShroudError::LeakageDetected { field: "gpsLatitude".to_string() }));
    assert_eq!(server.messages.message_count(), 0);
}

#[tokio::test]
async fn strict_policy_rejects_any_extension() {
    let server = SimServer::new();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    let options = RouteOptions {
        message_type: MessageType::Text,
        extensions: extensions(json!({"reaction": "+1"})),
    };
    let result =
        server.shroud.router.route_message(ENVELOPE, CHAT, &created.primary_id, options).await;

    assert_eq!(result, Err(ShroudError::LeakageDetected { field: "reaction".to_string() }));
}

#[tokio::test]
async fn deny_list_policy_keeps_clean_extensions() {
    let server = deny_list_server();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    let options = RouteOptions {
        message_type: MessageType::Audio,
        extensions: extensions(json!({"reaction": "+1"})),
    };
    server.shroud.router.route_message(ENVELOPE, CHAT, &created.primary_id, options).await.unwrap();

    let messages = server.shroud.router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    assert_eq!(messages[0].message_type, MessageType::Audio);
    assert_eq!(messages[0].extensions.get("reaction"), Some(&json!("+1")));
}

#[tokio::test]
async fn chat_id_is_stripped_and_length_checked() {
    let server = SimServer::new();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let router = &server.shroud.router;

    router
        .route_message(ENVELOPE, "chat id / with <junk>", &created.primary_id, RouteOptions::default())
        .await
        .unwrap();
    let messages = router.get_chat_messages("chatidwithjunk", 10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].chat_id, "chatidwithjunk");

    let too_long = "x".repeat(129);
    for bad in ["short", "!!!!!!!!!!!!", too_long.as_str()] {
        let result =
            router.route_message(ENVELOPE, bad, &created.primary_id, RouteOptions::default()).await;
        assert!(matches!(result, Err(ShroudError::Validation { field: "chatId", .. })), "{bad}");
    }
}

#[tokio::test]
async fn envelope_checks() {
    let mut config = ServerConfig::default();
    config.router.max_envelope_size = 64;
    let server = SimServer::with_config(0, config);
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let router = &server.shroud.router;

    let empty = router.route_message("", CHAT, &created.primary_id, RouteOptions::default()).await;
    assert!(matches!(empty, Err(ShroudError::Validation { field: "envelope", .. })));

    let oversized = "A".repeat(65);
    let result =
        router.route_message(&oversized, CHAT, &created.primary_id, RouteOptions::default()).await;
    assert_eq!(result, Err(ShroudError::CapacityExceeded { size: 65, limit: 64 }));

    let padded = router.route_message("AAAA+/==", CHAT, &created.primary_id, RouteOptions::default()).await;
    assert!(matches!(padded, Err(ShroudError::Validation { field: "envelope", .. })));

    assert_eq!(server.messages.message_count(), 0);
}

#[tokio::test]
async fn unknown_sender_is_rejected() {
    let server = SimServer::new();

    let result =
        server.shroud.router.route_message(ENVELOPE, CHAT, "anon_ghost", RouteOptions::default()).await;

    assert_eq!(result, Err(ShroudError::NotFound { kind: ResourceKind::Session }));
    assert_eq!(server.messages.message_count(), 0);
}

#[tokio::test]
async fn leaky_stored_record_is_dropped_on_read() {
    let server = SimServer::new();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let router = &server.shroud.router;

    router.route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default()).await.unwrap();

    // Written behind the router's back
    let metadata = extensions(json!({
        "messageType": "text",
        "timestamp": SIM_EPOCH_MS,
        "size": 4,
        "senderDevice": "pixel-7",
    }));
    server.messages.store_message("msg_injected", "AAAA", CHAT, &metadata).unwrap();

    let messages = router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_ne!(messages[0].id, "msg_injected");
}

#[tokio::test]
async fn old_messages_are_never_returned() {
    let server = SimServer::new();
    let router = &server.shroud.router;

    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    router.route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default()).await.unwrap();

    server.advance(29 * DAY);
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    router.route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default()).await.unwrap();
    assert_eq!(router.get_chat_messages(CHAT, 10, 0).await.unwrap().len(), 2);

    server.advance(DAY);
    let messages = router.get_chat_messages(CHAT, 10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].timestamp, SIM_EPOCH_MS + 29 * 24 * 3_600_000);
}

#[tokio::test]
async fn page_size_is_clamped_and_newest_first() {
    let mut config = ServerConfig::default();
    config.router.max_page_size = 2;
    let server = SimServer::with_config(0, config);
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    let router = &server.shroud.router;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let routed = router
            .route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default())
            .await
            .unwrap();
        ids.push(routed.message_id);
        server.advance(Duration::from_secs(1));
    }

    let page: Vec<String> =
        router.get_chat_messages(CHAT, 50, 0).await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(page, vec![ids[2].clone(), ids[1].clone()]);

    let rest: Vec<String> =
        router.get_chat_messages(CHAT, 50, 2).await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(rest, vec![ids[0].clone()]);

    assert!(router.get_chat_messages(CHAT, 0, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_prunes_expired_routing_entries() {
    let server = SimServer::new();
    let router = &server.shroud.router;

    // Both messages fall in the same hour window
    let first = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    router.route_message(ENVELOPE, CHAT, &first.primary_id, RouteOptions::default()).await.unwrap();

    server.advance(40 * MINUTE);
    let second = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    router.route_message(ENVELOPE, CHAT, &second.primary_id, RouteOptions::default()).await.unwrap();

    // Past the first entry's lifetime, short of the second's
    server.advance(7 * DAY - 40 * MINUTE + Duration::from_secs(1));
    let report = router.cleanup_routing_data().await.unwrap();
    assert_eq!(report.buckets_scanned, 1);
    assert_eq!(report.entries_removed, 1);
    assert_eq!(report.buckets_deleted, 0);

    let stats = router.routing_stats().await.unwrap();
    assert_eq!((stats.active_chats, stats.indexed_messages), (1, 1));
}

#[tokio::test]
async fn routing_buckets_are_split_by_window() {
    let server = SimServer::new();
    let router = &server.shroud.router;
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

    for _ in 0..3 {
        router.route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default()).await.unwrap();
        server.advance(2 * HOUR);
    }

    let keys = server.store.scan_prefix("route:").unwrap();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|key| key.starts_with(&format!("route:{CHAT}:"))));

    let stats = router.routing_stats().await.unwrap();
    assert_eq!((stats.active_chats, stats.indexed_messages), (1, 3));

    let report = router.cleanup_routing_data().await.unwrap();
    assert_eq!((report.buckets_scanned, report.entries_removed), (3, 0));
}

/// Decoded view of a stored routing bucket.
#[derive(Deserialize)]
struct Bucket {
    entries: Vec<RoutingRecord>,
}

#[tokio::test]
async fn concurrent_routes_to_one_chat_are_all_indexed() {
    const SENDERS: usize = 8;

    for seed in 0..8 {
        let env = SimEnv::with_seed(seed);
        let store = ChaoticStore::with_seed(MemoryStore::new(env.clone()), 0.2, seed);
        let mut config = ServerConfig::default();
        config.retry.max_attempts = 8;
        config.session.max_cas_attempts = 64;
        let backends = Backends {
            sessions: store.clone(),
            messages: MemoryMessageStore::new(),
            routing: store.clone(),
        };
        let shroud = Shroud::new(env, backends, MemoryMailbox::new(), config);
        let sender = shroud.sessions.create_session(SessionSeed::default()).await.unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..SENDERS {
            let router = shroud.router.clone();
            let sender = sender.primary_id.clone();
            tasks.spawn(async move {
                router.route_message(ENVELOPE, CHAT, &sender, RouteOptions::default()).await
            });
        }

        let mut routed = BTreeSet::new();
        while let Some(result) = tasks.join_next().await {
            routed.insert(result.unwrap().unwrap().message_id);
        }
        assert_eq!(routed.len(), SENDERS);

        let stats = shroud.router.routing_stats().await.unwrap();
        assert_eq!((stats.active_chats, stats.indexed_messages), (1, SENDERS), "seed {seed}");

        let mut indexed = BTreeSet::new();
        for key in store.inner().scan_prefix("route:").unwrap() {
            let entry = store.inner().get(&key).unwrap().unwrap();
            let bucket: Bucket = decode(&entry.value).unwrap();
            indexed.extend(bucket.entries.into_iter().map(|record| record.message_id));
        }
        assert_eq!(indexed, routed, "seed {seed}");
    }
}

#[tokio::test]
async fn cleanup_deletes_emptied_buckets() {
    let server = SimServer::new();
    let created = server.shroud.sessions.create_session(SessionSeed::default()).await.unwrap();
    server
        .shroud
        .router
        .route_message(ENVELOPE, CHAT, &created.primary_id, RouteOptions::default())
        .await
        .unwrap();

    // A second server over the same store with a shorter index lifetime
    let mut config = ServerConfig::default();
    config.router.routing_ttl = DAY;
    let backends = Backends {
        sessions: server.store.clone(),
        messages: server.messages.clone(),
        routing: server.store.clone(),
    };
    let short_lived = Shroud::new(server.env.clone(), backends, MemoryMailbox::new(), config);

    server.advance(2 * DAY);
    let report = short_lived.router.cleanup_routing_data().await.unwrap();

    assert_eq!(report.entries_removed, 1);
    assert_eq!(report.buckets_deleted, 1);
    assert_eq!(server.shroud.router.routing_stats().await.unwrap().active_chats, 0);
}
