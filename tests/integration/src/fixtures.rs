//! Canned payloads and configuration for integration tests

use std::net::SocketAddr;

use derun_common::{ClientConfig, ShardCount};
use serde_json::{json, Value};

/// Token the mock API accepts
pub const TEST_TOKEN: &str = "test-token";

/// `GET /gateway/bot` body
pub fn gateway_bot_body(addr: SocketAddr, shards: u32, remaining: u32) -> Value {
    json!({
        "url": format!("ws://{addr}/gateway"),
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": remaining,
            "reset_after": 60_000,
            "max_concurrency": 1
        }
    })
}

/// READY body for one session
pub fn ready_body(session_id: &str, resume_url: &str, shard: Option<[u32; 2]>) -> Value {
    let mut ready = json!({
        "v": 10,
        "user": {"id": "1", "username": "integration", "bot": true},
        "guilds": [{"id": "10", "unavailable": true}],
        "session_id": session_id,
        "resume_gateway_url": resume_url,
    });
    if let Some(shard) = shard {
        ready["shard"] = json!(shard);
    }
    ready
}

/// Client configuration pointing at a mock server
///
/// Delays are shortened so multi-shard launches finish quickly.
pub fn test_config(addr: SocketAddr, token: &str, shard_count: ShardCount) -> ClientConfig {
    let mut config = ClientConfig::new(token).with_shard_count(shard_count);
    config.gateway.url = format!("ws://{addr}/gateway");
    config.gateway.connection_timeout_ms = 5_000;
    config.gateway.spawn_cooldown_ms = 50;
    config.gateway.reconnect_base_delay_ms = 100;
    config.gateway.reconnect_max_delay_ms = 500;
    config.rest.api_base_url = format!("http://{addr}/api/v10");
    config
}
