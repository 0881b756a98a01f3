//! Translation from loaded [`Config`] sections into component settings.

use std::time::Duration;

use dcore_config::{Config, ConfigResult};
use dcore_gateway::SessionConfig;
use dcore_http::DispatcherConfig;

/// Dispatcher settings from the `[http]` section.
///
/// # Errors
///
/// Returns an error if no token is configured.
pub fn dispatcher_config(config: &Config) -> ConfigResult<DispatcherConfig> {
    let http = &config.http;
    let mut settings = DispatcherConfig::new(config.require_token()?)
        .with_base_url(http.base_url.as_str())
        .with_max_retries(http.max_retries)
        .with_backoff(
            Duration::from_millis(http.backoff_base_ms),
            Duration::from_millis(http.backoff_max_ms),
        );
    settings.user_agent_url.clone_from(&http.user_agent_url);
    Ok(settings)
}

/// Session template from the `[gateway]` section.
///
/// Shard id and count are filled in per shard by the shard manager.
///
/// # Errors
///
/// Returns an error if no token is configured.
pub fn session_config(config: &Config) -> ConfigResult<SessionConfig> {
    let gateway = &config.gateway;
    let mut settings = SessionConfig::new(config.require_token()?)
        .with_intents(gateway.intents)
        .with_backoff(
            Duration::from_millis(gateway.backoff_base_ms),
            Duration::from_millis(gateway.backoff_max_ms),
        );
    settings.large_threshold = gateway.large_threshold;
    settings.hello_timeout = Duration::from_secs(gateway.hello_timeout_secs);
    settings.max_reconnect_attempts = gateway.max_reconnect_attempts;
    Ok(settings)
}
