//! Configuration types.
//!
//! Every struct implements [`Default`] with production defaults so that a
//! bare `[section]` header in TOML produces a working configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the dcore client.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot token, without the `Bot ` prefix. Prefer the `DCORE_TOKEN`
    /// environment variable over storing this in a file.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Request layer settings.
    pub http: HttpSection,
    /// Gateway session settings.
    pub gateway: GatewaySection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("has_token", &self.token.is_some())
            .field("http", &self.http)
            .field("gateway", &self.gateway)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Config {
    /// The configured token, or [`ConfigError::MissingToken`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when no token is set.
    ///
    /// [`ConfigError::MissingToken`]: crate::ConfigError::MissingToken
    pub fn require_token(&self) -> crate::ConfigResult<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(crate::ConfigError::MissingToken)
    }
}

// ---------------------------------------------------------------------------
// HttpSection
// ---------------------------------------------------------------------------

/// Request dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// REST API base URL, including the version segment.
    pub base_url: String,
    /// Maximum number of retries for one request before a terminal error.
    pub max_retries: u32,
    /// Base delay for 5xx/transport retry backoff (milliseconds).
    pub backoff_base_ms: u64,
    /// Maximum retry backoff delay (milliseconds).
    pub backoff_max_ms: u64,
    /// Per-request timeout applied by the HTTP transport (seconds).
    pub request_timeout_secs: u64,
    /// Account-wide request budget per second.
    pub global_requests_per_second: u32,
    /// URL advertised in the `User-Agent` header.
    pub user_agent_url: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_owned(),
            max_retries: 10,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            request_timeout_secs: 15,
            global_requests_per_second: 50,
            user_agent_url: "https://github.com/dcore-rs/dcore".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// GatewaySection
// ---------------------------------------------------------------------------

/// Default intents: `GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES`.
pub const DEFAULT_INTENTS: u32 = (1 << 0) | (1 << 9) | (1 << 12);

/// Gateway session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Gateway URL. `None` asks `GET /gateway/bot` at startup.
    pub url: Option<String>,
    /// Intents bitmask sent with Identify.
    pub intents: u32,
    /// Total shard count across all processes. `None` uses the count
    /// recommended by the API.
    pub shard_count: Option<u32>,
    /// Shard ids run by this process. `None` runs every shard.
    pub shard_ids: Option<Vec<u32>>,
    /// Member count above which guilds are sent without offline members.
    pub large_threshold: u32,
    /// How long to wait for Hello after the socket opens (seconds).
    pub hello_timeout_secs: u64,
    /// Base delay for reconnect backoff (milliseconds).
    pub backoff_base_ms: u64,
    /// Maximum reconnect backoff delay (milliseconds).
    pub backoff_max_ms: u64,
    /// Consecutive failed reconnects before giving up. `None` never gives up.
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the event channel shared by all shards.
    pub event_buffer: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: None,
            intents: DEFAULT_INTENTS,
            shard_count: None,
            shard_ids: None,
            large_threshold: 250,
            hello_timeout_secs: 30,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            max_reconnect_attempts: None,
            event_buffer: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["dcore_gateway=debug",
    /// "hyper=warn"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
