//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound on `http.max_retries`.
const MAX_RETRIES_UPPER_BOUND: u32 = 100;

/// Valid range for `gateway.large_threshold`.
const LARGE_THRESHOLD_RANGE: std::ops::RangeInclusive<u32> = 50..=250;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_token(config)?;
    validate_http(config)?;
    validate_gateway(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_token(config: &Config) -> ConfigResult<()> {
    if let Some(token) = &config.token
        && token.trim().is_empty()
    {
        return Err(invalid("token", "token must not be empty when set"));
    }
    Ok(())
}

fn validate_http(config: &Config) -> ConfigResult<()> {
    let h = &config.http;

    let url = url::Url::parse(&h.base_url)
        .map_err(|e| invalid("http.base_url", format!("'{}' is not a valid URL: {e}", h.base_url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            "http.base_url",
            format!("scheme '{}' is not supported; expected http or https", url.scheme()),
        ));
    }

    if h.max_retries > MAX_RETRIES_UPPER_BOUND {
        return Err(invalid(
            "http.max_retries",
            format!("max_retries must be at most {MAX_RETRIES_UPPER_BOUND}"),
        ));
    }

    if h.backoff_base_ms > h.backoff_max_ms {
        return Err(invalid(
            "http.backoff_base_ms",
            format!(
                "backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                h.backoff_base_ms, h.backoff_max_ms
            ),
        ));
    }

    if h.request_timeout_secs == 0 {
        return Err(invalid("http.request_timeout_secs", "must be greater than 0"));
    }

    if h.global_requests_per_second == 0 {
        return Err(invalid("http.global_requests_per_second", "must be greater than 0"));
    }

    Ok(())
}

fn validate_gateway(config: &Config) -> ConfigResult<()> {
    let g = &config.gateway;

    if let Some(raw) = &g.url {
        let url = url::Url::parse(raw)
            .map_err(|e| invalid("gateway.url", format!("'{raw}' is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid(
                "gateway.url",
                format!("scheme '{}' is not supported; expected ws or wss", url.scheme()),
            ));
        }
    }

    if g.shard_count == Some(0) {
        return Err(invalid("gateway.shard_count", "shard_count must be at least 1"));
    }

    if let Some(ids) = &g.shard_ids {
        if ids.is_empty() {
            return Err(invalid("gateway.shard_ids", "shard_ids must not be empty when set"));
        }
        let Some(count) = g.shard_count else {
            return Err(invalid(
                "gateway.shard_ids",
                "shard_ids requires an explicit shard_count",
            ));
        };
        if let Some(bad) = ids.iter().find(|id| **id >= count) {
            return Err(invalid(
                "gateway.shard_ids",
                format!("shard id {bad} is out of range for shard_count {count}"),
            ));
        }
    }

    if !LARGE_THRESHOLD_RANGE.contains(&g.large_threshold) {
        return Err(invalid(
            "gateway.large_threshold",
            format!(
                "large_threshold must be between {} and {}",
                LARGE_THRESHOLD_RANGE.start(),
                LARGE_THRESHOLD_RANGE.end()
            ),
        ));
    }

    if g.hello_timeout_secs == 0 {
        return Err(invalid("gateway.hello_timeout_secs", "must be greater than 0"));
    }

    if g.backoff_base_ms > g.backoff_max_ms {
        return Err(invalid(
            "gateway.backoff_base_ms",
            format!(
                "backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                g.backoff_base_ms, g.backoff_max_ms
            ),
        ));
    }

    if g.event_buffer == 0 {
        return Err(invalid("gateway.event_buffer", "must be greater than 0"));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }

    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }

    Ok(())
}
