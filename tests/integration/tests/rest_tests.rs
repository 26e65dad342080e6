//! REST Integration Tests
//!
//! Drive the dispatcher against the local mock server.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::time::Duration;

use derun_common::{RestConfig, Token};
use derun_rest::{RequestMethod, RestDispatcher, RestError};
use integration_tests::{MockOptions, MockServer, TEST_TOKEN};

fn dispatcher(server: &MockServer, token: &str) -> RestDispatcher {
    let config = RestConfig {
        api_base_url: format!("http://{}/api/v10", server.addr),
        ..RestConfig::default()
    };
    RestDispatcher::new(Token::new(token), config).expect("Failed to build dispatcher")
}

#[tokio::test]
async fn test_gateway_bot() {
    let server = MockServer::start_with(MockOptions {
        shards: 4,
        remaining: 999,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");

    let info = dispatcher(&server, TEST_TOKEN).gateway_bot().await.unwrap();

    assert_eq!(info.shards, 4);
    assert_eq!(info.session_start_limit.remaining, 999);
    assert!(info.session_start_limit.allows(4));
    assert_eq!(info.url, format!("ws://{}/gateway", server.addr));
}

#[tokio::test]
async fn test_rejected_token() {
    let server = MockServer::start().await.expect("Failed to start server");

    let err = dispatcher(&server, "wrong-token")
        .request(RequestMethod::Get, "/channels/1/messages", true, None)
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::Unauthorized));
    assert!(server.message_hits().is_empty());
}

#[tokio::test]
async fn test_exhausted_route_waits_for_reset() {
    let server = MockServer::start_with(MockOptions {
        reset_after: 0.2,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let rest = dispatcher(&server, TEST_TOKEN);

    let first = rest
        .request(RequestMethod::Get, "/channels/1/messages", true, None)
        .await
        .unwrap();
    assert_eq!(first, Some(serde_json::json!([])));

    rest.request(RequestMethod::Get, "/channels/1/messages", true, None)
        .await
        .unwrap();

    let hits = server.message_hits();
    assert_eq!(hits.len(), 2);
    // Reset window plus the safety offset
    assert!(hits[1] - hits[0] >= Duration::from_millis(450));
}

#[tokio::test]
async fn test_other_channel_is_not_delayed() {
    let server = MockServer::start_with(MockOptions {
        reset_after: 5.0,
        ..MockOptions::default()
    })
    .await
    .expect("Failed to start server");
    let rest = dispatcher(&server, TEST_TOKEN);

    rest.request(RequestMethod::Get, "/channels/1/messages", true, None)
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        rest.request(RequestMethod::Get, "/channels/2/messages", true, None),
    )
    .await
    .expect("second channel was held back")
    .unwrap();
}

#[tokio::test]
async fn test_no_content_yields_none() {
    let server = MockServer::start().await.expect("Failed to start server");

    let result = dispatcher(&server, TEST_TOKEN)
        .request(RequestMethod::Post, "/channels/1/typing", true, None)
        .await
        .unwrap();

    assert_eq!(result, None);
}
