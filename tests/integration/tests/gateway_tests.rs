//! Gateway Integration Tests
//!
//! Launch the shard manager against the local mock server.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use derun_common::ShardCount;
use derun_gateway::protocol::{Activity, PresenceUpdatePayload};
use derun_gateway::{ClientEvent, ShardManager, ShardStatus, StartupError};
use integration_tests::{
    collect_until, test_config, wait_for, MockOptions, MockServer, TEST_TOKEN,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn ready_order(events: &[ClientEvent]) -> Vec<Option<u32>> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::ShardReady { shard_id, .. } => Some(Some(*shard_id)),
            ClientEvent::Ready => Some(None),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Launch Tests
// ============================================================================

#[tokio::test]
async fn test_single_shard_becomes_ready() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");
    let mut events = manager.subscribe();

    tokio::time::timeout(TIMEOUT, manager.launch())
        .await
        .expect("launch timed out")
        .expect("launch failed");

    let seen = collect_until(&mut events, TIMEOUT, |e| matches!(e, ClientEvent::Ready))
        .await
        .unwrap();
    assert_eq!(ready_order(&seen), vec![Some(0), None]);

    // Unsharded sessions omit the shard field
    assert_eq!(server.identifies(), vec![None]);
    assert_eq!(manager.shard_count(), Some(1));

    let shard = manager.shard(0).expect("shard 0 missing");
    assert_eq!(shard.status(), ShardStatus::Connected);
    assert_eq!(shard.session_id().as_deref(), Some("session-0"));
    assert_eq!(shard.sequence(), Some(1));

    manager.shutdown().await;
    assert!(!shard.is_running());
    assert!(manager.shards().is_empty());
}

#[tokio::test]
async fn test_shards_start_in_order() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::fixed(3)))
        .expect("Failed to create manager");
    let mut events = manager.subscribe();

    tokio::time::timeout(TIMEOUT, manager.launch())
        .await
        .expect("launch timed out")
        .expect("launch failed");

    let seen = collect_until(&mut events, TIMEOUT, |e| matches!(e, ClientEvent::Ready))
        .await
        .unwrap();
    assert_eq!(ready_order(&seen), vec![Some(0), Some(1), Some(2), None]);
    assert_eq!(
        server.identifies(),
        vec![Some([0, 3]), Some([1, 3]), Some([2, 3])]
    );

    let statuses = manager.statuses();
    assert_eq!(statuses.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(statuses.iter().all(|s| s.status == ShardStatus::Connected));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_second_launch_is_noop() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");

    manager.launch().await.expect("launch failed");
    manager.launch().await.expect("second launch failed");

    assert_eq!(server.gateway_bot_calls(), 1);
    assert_eq!(server.connections(), 1);
    assert_eq!(manager.shards().len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_launch_respects_session_budget() {
    let server = MockServer::start_with(MockOptions {
        shards: 2,
        remaining: 1,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");

    match manager.launch().await {
        Err(StartupError::SessionStartLimit {
            remaining,
            required,
            ..
        }) => {
            assert_eq!(remaining, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected session start limit error, got {other:?}"),
    }
    assert_eq!(server.connections(), 0);
    assert!(manager.shards().is_empty());
}

#[tokio::test]
async fn test_rejected_token_aborts_launch() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, "wrong-token", ShardCount::Auto))
        .expect("Failed to create manager");

    let err = manager.launch().await.unwrap_err();
    assert!(matches!(err, StartupError::Unauthorized));
    assert_eq!(err.code(), "UNAUTHORIZED");
    assert_eq!(server.connections(), 0);
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let server = MockServer::start_with(MockOptions {
        reconnect_after_ready: true,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");
    let mut events = manager.subscribe();

    manager.launch().await.expect("launch failed");

    let resumed = wait_for(&mut events, TIMEOUT, |e| {
        matches!(e, ClientEvent::ShardResumed { .. })
    })
    .await
    .expect("shard never resumed");
    assert_eq!(resumed.shard_id(), Some(0));

    assert_eq!(server.connections(), 2);
    assert_eq!(server.identifies().len(), 1);
    assert_eq!(server.resumes(), vec![("session-0".to_string(), 1)]);

    let shard = manager.shard(0).expect("shard 0 missing");
    assert_eq!(shard.status(), ShardStatus::Connected);
    assert_eq!(shard.session_id().as_deref(), Some("session-0"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_presence_update_reaches_gateway() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");
    manager.launch().await.expect("launch failed");

    let errors = manager.edit_status(&PresenceUpdatePayload::online(Activity::playing("tests")), None);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    tokio::time::timeout(TIMEOUT, async {
        while server.presences().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("presence never arrived");

    let presences = server.presences();
    assert_eq!(presences[0].activities, vec![Activity::playing("tests")]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_listener_sees_ready() {
    let server = MockServer::start().await.expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager
        .on_dispatch(move |shard_id, event, data| {
            let _ = tx.send((shard_id, event.to_string(), data["session_id"].clone()));
        })
        .unwrap();

    manager.launch().await.expect("launch failed");

    let (shard_id, event, session_id) = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("no dispatch")
        .expect("listener dropped");
    assert_eq!(shard_id, 0);
    assert_eq!(event, "READY");
    assert_eq!(session_id, "session-0");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_fatal_close_aborts_launch() {
    let server = MockServer::start_with(MockOptions {
        close_code: Some(4004),
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let manager = ShardManager::new(test_config(server.addr, TEST_TOKEN, ShardCount::Auto))
        .expect("Failed to create manager");

    let err = tokio::time::timeout(TIMEOUT, manager.launch())
        .await
        .expect("launch timed out")
        .unwrap_err();
    match &err {
        StartupError::ShardFailed { shard_id, error } => {
            assert_eq!(*shard_id, 0);
            assert!(error.is_fatal());
            assert_eq!(error.close_code().map(u16::from), Some(4004));
        }
        other => panic!("expected shard failure, got {other:?}"),
    }
    assert!(manager.shards().is_empty());

    // A fatal close is never retried
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(server.identifies().len(), 1);

    // The failed launch does not count as launched
    let err = tokio::time::timeout(TIMEOUT, manager.launch())
        .await
        .expect("second launch timed out")
        .unwrap_err();
    assert!(matches!(err, StartupError::ShardFailed { .. }));
    assert_eq!(server.gateway_bot_calls(), 2);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_repeated_drops_fall_back_to_identify() {
    let server = MockServer::start_with(MockOptions {
        drop_connections: 3,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let mut config = test_config(server.addr, TEST_TOKEN, ShardCount::Auto);
    config.gateway.max_resume_attempts = 3;
    let manager = ShardManager::new(config).expect("Failed to create manager");
    let mut events = manager.subscribe();

    manager.launch().await.expect("launch failed");

    let mut readies = 0;
    let seen = collect_until(&mut events, TIMEOUT, |e| {
        if matches!(e, ClientEvent::ShardReady { .. }) {
            readies += 1;
        }
        readies == 2
    })
    .await
    .expect("shard never identified again");

    // One reconnect per dropped connection
    let warnings = seen
        .iter()
        .filter(|e| matches!(e, ClientEvent::ShardWarn { .. }))
        .count();
    assert_eq!(warnings, 3);
    assert_eq!(server.connections(), 4);

    // Two resumes of the first session, then a fresh identify
    assert_eq!(
        server.resumes(),
        vec![("session-0".to_string(), 1), ("session-0".to_string(), 1)]
    );
    assert_eq!(server.identifies().len(), 2);
    assert!(!seen.iter().any(|e| matches!(e, ClientEvent::ShardResumed { .. })));

    let shard = manager.shard(0).expect("shard 0 missing");
    assert_eq!(shard.session_id().as_deref(), Some("session-3"));

    manager.shutdown().await;
}
