//! Client configuration structs
//!
//! Loads configuration from environment variables or any serde source. Every
//! constructor path ends in `normalized()`, which applies the documented clamps,
//! so a `ClientConfig` handed to the REST or gateway layer is always in range.

use crate::auth::Token;
use derun_core::Intents;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub token: Token,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rest: RestConfig,
    /// Per-event subscriber limit on the client emitter
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
}

/// Number of shards to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ShardCountRepr")]
pub enum ShardCount {
    /// Use the count recommended by `GET /gateway/bot`
    #[default]
    Auto,
    Fixed(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ShardCountRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<ShardCountRepr> for ShardCount {
    type Error = ConfigError;

    fn try_from(repr: ShardCountRepr) -> Result<Self, Self::Error> {
        match repr {
            ShardCountRepr::Number(n) => Ok(Self::fixed(n)),
            ShardCountRepr::Text(s) => s.parse(),
        }
    }
}

impl ShardCount {
    /// A literal shard count, clamped to at least one
    #[must_use]
    pub fn fixed(count: u32) -> Self {
        Self::Fixed(count.max(1))
    }

    /// Resolve against the gateway's recommended count
    #[must_use]
    pub fn resolve(self, recommended: u32) -> u32 {
        match self {
            Self::Auto => recommended.max(1),
            Self::Fixed(count) => count.max(1),
        }
    }
}

impl FromStr for ShardCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<u32>()
            .map(Self::fixed)
            .map_err(|_| ConfigError::InvalidValue("shard_count", s.to_string()))
    }
}

impl fmt::Display for ShardCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(count) => write!(f, "{count}"),
        }
    }
}

/// Gateway (WebSocket) settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, without query string
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default)]
    pub shard_count: ShardCount,
    #[serde(default)]
    pub intents: Intents,
    /// Socket open plus HELLO must complete within this many milliseconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    /// Pause between one shard becoming ready and the next one starting
    #[serde(default = "default_spawn_cooldown")]
    pub spawn_cooldown_ms: u64,
    #[serde(default)]
    pub emit_raw_payloads: bool,
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failed reconnects before the session is dropped
    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,
}

impl GatewayConfig {
    /// Gateway protocol version
    pub const VERSION: u8 = 10;
    pub const MIN_LARGE_THRESHOLD: u32 = 50;
    pub const MAX_LARGE_THRESHOLD: u32 = 250;
    pub const MIN_CONNECTION_TIMEOUT_MS: u64 = 1_000;

    /// Apply clamps
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.large_threshold = self
            .large_threshold
            .clamp(Self::MIN_LARGE_THRESHOLD, Self::MAX_LARGE_THRESHOLD);
        self.connection_timeout_ms = self.connection_timeout_ms.max(Self::MIN_CONNECTION_TIMEOUT_MS);
        self.max_resume_attempts = self.max_resume_attempts.max(1);
        self.reconnect_max_delay_ms = self.reconnect_max_delay_ms.max(self.reconnect_base_delay_ms);
        self
    }

    /// Full connect URL including version and encoding
    #[must_use]
    pub fn connect_url(&self) -> String {
        Self::versioned_url(&self.url)
    }

    /// Append the version/encoding query to a bare gateway URL
    #[must_use]
    pub fn versioned_url(base: &str) -> String {
        let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');
        format!("{base}/?v={}&encoding=json", Self::VERSION)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn spawn_cooldown(&self) -> Duration {
        Duration::from_millis(self.spawn_cooldown_ms)
    }

    #[must_use]
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    #[must_use]
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            shard_count: ShardCount::Auto,
            intents: Intents::default(),
            connection_timeout_ms: default_connection_timeout(),
            large_threshold: default_large_threshold(),
            spawn_cooldown_ms: default_spawn_cooldown(),
            emit_raw_payloads: false,
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            max_resume_attempts: default_max_resume_attempts(),
        }
    }
}

/// REST dispatch settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Interval between stale bucket sweeps, also the staleness grace period
    #[serde(default = "default_clean_interval")]
    pub clean_interval_ms: u64,
    /// Safety margin added to every rate-limit wait
    #[serde(default = "default_time_offset")]
    pub time_offset_ms: u64,
    #[serde(default = "default_global_per_second")]
    pub global_per_second: u32,
    #[serde(default = "default_global_per_ten_minutes")]
    pub global_per_ten_minutes: u32,
}

impl RestConfig {
    pub const MIN_REQUEST_TIMEOUT_MS: u64 = 10_000;
    pub const MIN_CLEAN_INTERVAL_MS: u64 = 30_000;
    pub const MIN_TIME_OFFSET_MS: u64 = 300;

    /// Apply clamps
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.request_timeout_ms = self.request_timeout_ms.max(Self::MIN_REQUEST_TIMEOUT_MS);
        self.clean_interval_ms = self.clean_interval_ms.max(Self::MIN_CLEAN_INTERVAL_MS);
        self.time_offset_ms = self.time_offset_ms.max(Self::MIN_TIME_OFFSET_MS);
        self.global_per_second = self.global_per_second.max(1);
        self.global_per_ten_minutes = self.global_per_ten_minutes.max(1);
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.clean_interval_ms)
    }

    #[must_use]
    pub fn time_offset(&self) -> Duration {
        Duration::from_millis(self.time_offset_ms)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout(),
            clean_interval_ms: default_clean_interval(),
            time_offset_ms: default_time_offset(),
            global_per_second: default_global_per_second(),
            global_per_ten_minutes: default_global_per_ten_minutes(),
        }
    }
}

// Default value functions
fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_large_threshold() -> u32 {
    50
}

fn default_spawn_cooldown() -> u64 {
    5_000
}

fn default_reconnect_base_delay() -> u64 {
    4_000
}

fn default_reconnect_max_delay() -> u64 {
    60_000
}

fn default_max_resume_attempts() -> u32 {
    3
}

fn default_api_base_url() -> String {
    format!("https://discord.com/api/v{}", GatewayConfig::VERSION)
}

fn default_user_agent() -> String {
    concat!("DiscordBot (derun, ", env!("CARGO_PKG_VERSION"), ")").to_string()
}

fn default_request_timeout() -> u64 {
    15_000
}

fn default_clean_interval() -> u64 {
    300_000 // 5 minutes
}

fn default_time_offset() -> u64 {
    750
}

fn default_global_per_second() -> u32 {
    50
}

fn default_global_per_ten_minutes() -> u32 {
    10_000
}

fn default_max_listeners() -> usize {
    derun_core::DEFAULT_MAX_LISTENERS
}

impl ClientConfig {
    /// Default configuration for a token
    pub fn new(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
            max_listeners: default_max_listeners(),
        }
    }

    /// Apply every clamp
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.gateway = self.gateway.normalized();
        self.rest = self.rest.normalized();
        self
    }

    pub fn with_shard_count(mut self, shard_count: ShardCount) -> Self {
        self.gateway.shard_count = shard_count;
        self
    }

    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.gateway.intents = intents;
        self
    }

    pub fn with_large_threshold(mut self, large_threshold: u32) -> Self {
        self.gateway.large_threshold = large_threshold;
        self.normalized()
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway.url = url.into();
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.gateway.connection_timeout_ms = duration_ms(timeout);
        self.normalized()
    }

    pub fn with_spawn_cooldown(mut self, cooldown: Duration) -> Self {
        self.gateway.spawn_cooldown_ms = duration_ms(cooldown);
        self
    }

    pub fn with_emit_raw_payloads(mut self, enabled: bool) -> Self {
        self.gateway.emit_raw_payloads = enabled;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.gateway.reconnect_base_delay_ms = duration_ms(base);
        self.gateway.reconnect_max_delay_ms = duration_ms(max);
        self.normalized()
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.rest.request_timeout_ms = duration_ms(timeout);
        self.normalized()
    }

    pub fn with_clean_interval(mut self, interval: Duration) -> Self {
        self.rest.clean_interval_ms = duration_ms(interval);
        self.normalized()
    }

    pub fn with_time_offset(mut self, offset: Duration) -> Self {
        self.rest.time_offset_ms = duration_ms(offset);
        self.normalized()
    }

    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `DERUN_TOKEN` is missing or a variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DERUN_TOKEN")
            .map(Token::new)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingVar("DERUN_TOKEN"))?;

        let mut config = Self::new(token);
        let gateway = &mut config.gateway;
        let rest = &mut config.rest;

        if let Some(url) = lookup("DERUN_GATEWAY_URL") {
            gateway.url = url;
        }
        if let Some(count) = parse_var(&lookup, "DERUN_SHARD_COUNT")? {
            gateway.shard_count = count;
        }
        if let Some(raw) = lookup("DERUN_INTENTS") {
            gateway.intents = Intents::parse(&raw)
                .map_err(|_| ConfigError::InvalidValue("DERUN_INTENTS", raw))?;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_CONNECTION_TIMEOUT_MS")? {
            gateway.connection_timeout_ms = ms;
        }
        if let Some(threshold) = parse_var(&lookup, "DERUN_LARGE_THRESHOLD")? {
            gateway.large_threshold = threshold;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_SPAWN_COOLDOWN_MS")? {
            gateway.spawn_cooldown_ms = ms;
        }
        if let Some(raw) = lookup("DERUN_EMIT_RAW_PAYLOADS") {
            gateway.emit_raw_payloads = parse_bool(&raw)
                .ok_or(ConfigError::InvalidValue("DERUN_EMIT_RAW_PAYLOADS", raw))?;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_RECONNECT_BASE_DELAY_MS")? {
            gateway.reconnect_base_delay_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_RECONNECT_MAX_DELAY_MS")? {
            gateway.reconnect_max_delay_ms = ms;
        }
        if let Some(attempts) = parse_var(&lookup, "DERUN_MAX_RESUME_ATTEMPTS")? {
            gateway.max_resume_attempts = attempts;
        }

        if let Some(url) = lookup("DERUN_API_BASE_URL") {
            rest.api_base_url = url;
        }
        if let Some(agent) = lookup("DERUN_USER_AGENT") {
            rest.user_agent = agent;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_REQUEST_TIMEOUT_MS")? {
            rest.request_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_REQUEST_CLEAN_INTERVAL_MS")? {
            rest.clean_interval_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "DERUN_REST_TIME_OFFSET_MS")? {
            rest.time_offset_ms = ms;
        }
        if let Some(limit) = parse_var(&lookup, "DERUN_GLOBAL_PER_SECOND")? {
            rest.global_per_second = limit;
        }
        if let Some(limit) = parse_var(&lookup, "DERUN_GLOBAL_PER_TEN_MINUTES")? {
            rest.global_per_ten_minutes = limit;
        }

        if let Some(max) = parse_var(&lookup, "DERUN_MAX_LISTENERS")? {
            config.max_listeners = max;
        }

        Ok(config.normalized())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = ClientConfig::new("token");
        assert_eq!(config.gateway.shard_count, ShardCount::Auto);
        assert_eq!(config.gateway.intents, Intents::GUILDS);
        assert_eq!(config.gateway.connection_timeout_ms, 30_000);
        assert_eq!(config.gateway.large_threshold, 50);
        assert_eq!(config.gateway.spawn_cooldown_ms, 5_000);
        assert_eq!(config.rest.request_timeout_ms, 15_000);
        assert_eq!(config.rest.clean_interval_ms, 300_000);
        assert_eq!(config.rest.time_offset_ms, 750);
        assert_eq!(config.rest.api_base_url, "https://discord.com/api/v10");
    }

    #[test]
    fn test_large_threshold_clamp() {
        assert_eq!(ClientConfig::new("t").with_large_threshold(10).gateway.large_threshold, 50);
        assert_eq!(ClientConfig::new("t").with_large_threshold(500).gateway.large_threshold, 250);
        assert_eq!(ClientConfig::new("t").with_large_threshold(120).gateway.large_threshold, 120);
    }

    #[test]
    fn test_connection_timeout_clamp() {
        let config = ClientConfig::new("t").with_connection_timeout(Duration::ZERO);
        assert_eq!(config.gateway.connection_timeout_ms, 1_000);

        let config = ClientConfig::from_lookup(lookup_from(&[
            ("DERUN_TOKEN", "t"),
            ("DERUN_CONNECTION_TIMEOUT_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.gateway.connection_timeout(), Duration::from_secs(1));

        let config = ClientConfig::new("t").with_connection_timeout(Duration::from_secs(45));
        assert_eq!(config.gateway.connection_timeout_ms, 45_000);
    }

    #[test]
    fn test_rest_clamps() {
        let config = ClientConfig::new("t")
            .with_request_timeout(Duration::from_secs(2))
            .with_clean_interval(Duration::from_secs(1))
            .with_time_offset(Duration::from_millis(5));
        assert_eq!(config.rest.request_timeout_ms, 10_000);
        assert_eq!(config.rest.clean_interval_ms, 30_000);
        assert_eq!(config.rest.time_offset_ms, 300);

        let config = ClientConfig::new("t").with_request_timeout(Duration::from_secs(20));
        assert_eq!(config.rest.request_timeout_ms, 20_000);
    }

    #[test]
    fn test_shard_count_parse_and_resolve() {
        assert_eq!("auto".parse::<ShardCount>().unwrap(), ShardCount::Auto);
        assert_eq!("AUTO".parse::<ShardCount>().unwrap(), ShardCount::Auto);
        assert_eq!("4".parse::<ShardCount>().unwrap(), ShardCount::Fixed(4));
        assert_eq!("0".parse::<ShardCount>().unwrap(), ShardCount::Fixed(1));
        assert!("many".parse::<ShardCount>().is_err());

        assert_eq!(ShardCount::Auto.resolve(6), 6);
        assert_eq!(ShardCount::Auto.resolve(0), 1);
        assert_eq!(ShardCount::Fixed(3).resolve(6), 3);
    }

    #[test]
    fn test_shard_count_deserialize() {
        let auto: ShardCount = serde_json::from_str("\"auto\"").unwrap();
        let fixed: ShardCount = serde_json::from_str("2").unwrap();
        assert_eq!(auto, ShardCount::Auto);
        assert_eq!(fixed, ShardCount::Fixed(2));
    }

    #[test]
    fn test_connect_url() {
        let gateway = GatewayConfig::default();
        assert_eq!(gateway.connect_url(), "wss://gateway.discord.gg/?v=10&encoding=json");
        assert_eq!(
            GatewayConfig::versioned_url("wss://resume.example/?v=9"),
            "wss://resume.example/?v=10&encoding=json"
        );
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("DERUN_TOKEN", "Bot abc"),
            ("DERUN_SHARD_COUNT", "3"),
            ("DERUN_INTENTS", "GUILDS,GUILD_MESSAGES"),
            ("DERUN_LARGE_THRESHOLD", "1000"),
            ("DERUN_EMIT_RAW_PAYLOADS", "true"),
            ("DERUN_REQUEST_TIMEOUT_MS", "100"),
        ]))
        .unwrap();

        assert_eq!(config.token.expose(), "abc");
        assert_eq!(config.gateway.shard_count, ShardCount::Fixed(3));
        assert_eq!(config.gateway.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);
        assert_eq!(config.gateway.large_threshold, 250);
        assert!(config.gateway.emit_raw_payloads);
        assert_eq!(config.rest.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_lookup_errors() {
        let missing = ClientConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(missing, Err(ConfigError::MissingVar("DERUN_TOKEN"))));

        let invalid = ClientConfig::from_lookup(lookup_from(&[
            ("DERUN_TOKEN", "abc"),
            ("DERUN_CONNECTION_TIMEOUT_MS", "soon"),
        ]));
        assert!(matches!(
            invalid,
            Err(ConfigError::InvalidValue("DERUN_CONNECTION_TIMEOUT_MS", _))
        ));

        let bad_intent = ClientConfig::from_lookup(lookup_from(&[
            ("DERUN_TOKEN", "abc"),
            ("DERUN_INTENTS", "GUILDS,NOPE"),
        ]));
        assert!(matches!(bad_intent, Err(ConfigError::InvalidValue("DERUN_INTENTS", _))));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"token": "abc", "gateway": {"shard_count": "auto", "intents": 513}}"#,
        )
        .unwrap();
        assert_eq!(config.gateway.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);
        assert_eq!(config.rest.time_offset_ms, 750);
        assert_eq!(config.max_listeners, derun_core::DEFAULT_MAX_LISTENERS);
    }
}
