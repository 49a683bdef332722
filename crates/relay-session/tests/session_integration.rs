#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use relay_core::{Message, RelayError, Role, ToolCall};
use relay_session::{
    Chain, CreateSessionOptions, MessageLog, SessionInfo, SessionMetadata, SessionStore,
};

/// Helper: a store with one active session.
fn store_with_session(id: &str) -> SessionStore {
    let mut store = SessionStore::new();
    store
        .create_session(CreateSessionOptions {
            user_id: "0xwallet".into(),
            session_id: Some(id.into()),
            title: Some("Portfolio".into()),
            metadata: Some(SessionMetadata {
                chain: Chain::Mainnet,
                wallet_address: Some("0xwallet".into()),
                model: Some("gpt-4o-mini".into()),
                temperature: Some(0.3),
            }),
        })
        .unwrap();
    store
}

#[test]
fn test_create_with_explicit_fields() {
    let store = store_with_session("s1");
    let session = store.get("s1").unwrap();
    assert_eq!(session.title, "Portfolio");
    assert_eq!(session.user_id, "0xwallet");
    assert_eq!(session.metadata.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(session.message_count, 0);
}

#[test]
fn test_touch_tracks_exchanges() {
    let mut store = store_with_session("s1");
    store.touch("s1");
    store.touch("s1");
    store.touch("s1");
    assert_eq!(store.get("s1").unwrap().message_count, 3);
}

#[test]
fn test_merge_info_without_id_keeps_key() {
    let mut store = store_with_session("s1");
    let info: SessionInfo = serde_json::from_str(r#"{"title":"Bridge USDC"}"#).unwrap();
    assert_eq!(store.merge_info("s1", &info).as_deref(), Some("s1"));
    assert_eq!(store.get("s1").unwrap().title, "Bridge USDC");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_merge_info_unknown_session() {
    let mut store = store_with_session("s1");
    assert!(store.merge_info("other", &SessionInfo::default()).is_none());
}

#[test]
fn test_set_active_requires_known_session() {
    let mut store = store_with_session("s1");
    assert!(!store.set_active("s2"));
    assert_eq!(store.active_id(), Some("s1"));
}

#[test]
fn test_session_wire_format() {
    let store = store_with_session("s1");
    let json = serde_json::to_value(store.get("s1").unwrap()).unwrap();
    assert_eq!(json["sessionId"], "s1");
    assert_eq!(json["metadata"]["chain"], "mainnet");
    assert_eq!(json["metadata"]["walletAddress"], "0xwallet");
    assert!(json.get("lastActiveAt").is_some());
}

#[test]
fn test_log_ordering_under_interleaved_appends() {
    let base = Utc::now();
    let offsets = [5, 1, 9, 3, 7, 2, 8, 0, 6, 4];
    let mut log = MessageLog::new();
    for (i, offset) in offsets.iter().enumerate() {
        let msg = Message::user(format!("m{i}"))
            .with_id(format!("id-{i}"))
            .with_created_at(base + Duration::milliseconds(*offset));
        log.append(msg).unwrap();
    }

    let snapshot = log.snapshot();
    assert_eq!(snapshot.len(), offsets.len());
    assert!(snapshot
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn test_log_duplicate_keeps_length() {
    let mut log = MessageLog::new();
    let msg = Message::user("gm").with_id("u1");
    log.append(msg.clone()).unwrap();
    for _ in 0..3 {
        assert!(matches!(
            log.append(msg.clone()),
            Err(RelayError::DuplicateMessage(_))
        ));
    }
    assert_eq!(log.len(), 1);
}

#[test]
fn test_orphaned_tool_call_survives_finalize() {
    let mut log = MessageLog::new();
    let handle = log.begin_streaming_assistant_message("a1").unwrap();
    log.attach_tool_call(&handle, ToolCall::new("t1", "get_price", r#"{"coin":"APT"}"#))
        .unwrap();
    log.finalize(&handle).unwrap();

    let msg = log.get("a1").unwrap();
    assert_eq!(msg.role, Role::Assistant);
    assert_eq!(msg.tools.len(), 1);
    assert!(msg.tools[0].result.is_none());

    // Results arriving after the message closed are anomalies, not panics.
    assert!(matches!(
        log.resolve_tool_call(&handle, "t1", "1.0"),
        Err(RelayError::ProtocolAnomaly(_))
    ));
}
