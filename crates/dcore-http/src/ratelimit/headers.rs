//! Parsing of rate-limit response headers and 429 bodies.

use std::time::Duration;

use dcore_core::clock::{parse_seconds, seconds_to_duration};
use serde::Deserialize;

use crate::transport::HttpResponse;

/// `x-ratelimit-bucket`
pub const BUCKET: &str = "x-ratelimit-bucket";
/// `x-ratelimit-limit`
pub const LIMIT: &str = "x-ratelimit-limit";
/// `x-ratelimit-remaining`
pub const REMAINING: &str = "x-ratelimit-remaining";
/// `x-ratelimit-reset-after`
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
/// `x-ratelimit-global`
pub const GLOBAL: &str = "x-ratelimit-global";
/// `retry-after`
pub const RETRY_AFTER: &str = "retry-after";

/// Wait used when a 429 carries no usable duration.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Quota information extracted from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Server-assigned bucket hash.
    pub bucket: Option<String>,
    /// Requests allowed per window.
    pub limit: Option<u32>,
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Time until the window resets, rounded up to whole milliseconds.
    pub reset_after: Option<Duration>,
    /// Whether the limit hit was the account-wide one.
    pub global: bool,
}

impl RateLimitHeaders {
    /// Extract quota headers from `response`. Malformed values are ignored.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            bucket: response
                .header(BUCKET)
                .filter(|b| !b.is_empty())
                .map(str::to_owned),
            limit: response.header(LIMIT).and_then(|v| v.trim().parse().ok()),
            remaining: response.header(REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after: response.header(RESET_AFTER).and_then(parse_seconds),
            global: response
                .header(GLOBAL)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
        }
    }

    /// Whether the response carried any counter at all.
    #[must_use]
    pub fn has_counters(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset_after.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct TooManyRequestsBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// The server's instructions on a 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    /// How long to wait before retrying.
    pub wait: Duration,
    /// Whether every route must wait.
    pub global: bool,
}

impl RetryAfter {
    /// Read the wait from the JSON body, falling back to the `retry-after`
    /// header, then to `x-ratelimit-reset-after`.
    #[must_use]
    pub fn from_response(response: &HttpResponse, headers: &RateLimitHeaders) -> Self {
        let body: Option<TooManyRequestsBody> = serde_json::from_slice(&response.body).ok();

        let wait = body
            .as_ref()
            .and_then(|b| b.retry_after)
            .and_then(seconds_to_duration)
            .or_else(|| response.header(RETRY_AFTER).and_then(parse_seconds))
            .or(headers.reset_after)
            .unwrap_or(FALLBACK_RETRY_AFTER);

        let global = headers.global || body.is_some_and(|b| b.global);
        Self { wait, global }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_header_set() {
        let response = HttpResponse::new(200)
            .with_header(BUCKET, "abcd1234")
            .with_header(LIMIT, "5")
            .with_header(REMAINING, "4")
            .with_header(RESET_AFTER, "1.337");
        let headers = RateLimitHeaders::from_response(&response);

        assert_eq!(headers.bucket.as_deref(), Some("abcd1234"));
        assert_eq!(headers.limit, Some(5));
        assert_eq!(headers.remaining, Some(4));
        assert_eq!(headers.reset_after, Some(Duration::from_millis(1337)));
        assert!(!headers.global);
        assert!(headers.has_counters());
    }

    #[test]
    fn missing_and_malformed_headers_are_none() {
        let response = HttpResponse::new(200)
            .with_header(REMAINING, "lots")
            .with_header(BUCKET, "");
        let headers = RateLimitHeaders::from_response(&response);
        assert_eq!(headers, RateLimitHeaders::default());
        assert!(!headers.has_counters());
    }

    #[test]
    fn retry_after_prefers_body() {
        let response = HttpResponse::new(429)
            .with_header(RETRY_AFTER, "9")
            .with_body(r#"{"message":"You are being rate limited.","retry_after":0.25,"global":false}"#);
        let headers = RateLimitHeaders::from_response(&response);
        let retry = RetryAfter::from_response(&response, &headers);
        assert_eq!(retry.wait, Duration::from_millis(250));
        assert!(!retry.global);
    }

    #[test]
    fn retry_after_falls_back_to_header() {
        let response = HttpResponse::new(429).with_header(RETRY_AFTER, "3");
        let retry = RetryAfter::from_response(&response, &RateLimitHeaders::default());
        assert_eq!(retry.wait, Duration::from_secs(3));
    }

    #[test]
    fn global_flag_from_header_or_body() {
        let response = HttpResponse::new(429)
            .with_header(GLOBAL, "true")
            .with_body(r#"{"retry_after":1}"#);
        let headers = RateLimitHeaders::from_response(&response);
        assert!(RetryAfter::from_response(&response, &headers).global);

        let response = HttpResponse::new(429).with_body(r#"{"retry_after":1,"global":true}"#);
        let headers = RateLimitHeaders::from_response(&response);
        assert!(RetryAfter::from_response(&response, &headers).global);
    }

    #[test]
    fn retry_after_defaults_when_absent() {
        let response = HttpResponse::new(429);
        let retry = RetryAfter::from_response(&response, &RateLimitHeaders::default());
        assert_eq!(retry.wait, FALLBACK_RETRY_AFTER);
    }
}
