//! The request dispatcher: acquire, send, record, retry.

use std::sync::Arc;
use std::time::Duration;

use dcore_core::Backoff;
use dcore_core::clock;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult, FailureKind};
use crate::ratelimit::{RateLimitHeaders, RateLimiter, RetryAfter};
use crate::request::{DEFAULT_MAX_RETRIES, RequestDescriptor};
use crate::route::Route;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Default REST base URL.
pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

/// Settings for a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Bot token without the `Bot ` prefix.
    pub token: String,
    /// Base URL every route path is appended to.
    pub base_url: String,
    /// URL advertised in the `User-Agent` header.
    pub user_agent_url: String,
    /// Retry cap given to descriptors built by [`Dispatcher::request`].
    pub max_retries: u32,
    /// Base delay for 5xx/transport backoff.
    pub backoff_base: Duration,
    /// Maximum 5xx/transport backoff delay.
    pub backoff_max: Duration,
}

impl std::fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("has_token", &!self.token.is_empty())
            .field("base_url", &self.base_url)
            .field("user_agent_url", &self.user_agent_url)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .finish()
    }
}

impl DispatcherConfig {
    /// Defaults for everything except the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            user_agent_url: "https://github.com/dcore-rs/dcore".to_owned(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }

    /// Override the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the retry cap.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    fn user_agent(&self) -> String {
        format!(
            "DiscordBot ({}, {})",
            self.user_agent_url,
            env!("CARGO_PKG_VERSION")
        )
    }
}

/// Sends [`RequestDescriptor`]s while honouring per-route and global limits.
///
/// Cheap to clone; clones share the limiter, transport, and shutdown token.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    config: Arc<DispatcherConfig>,
    user_agent: Arc<str>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher over `transport` sharing `limiter`.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        let user_agent = config.user_agent().into();
        Self {
            transport,
            limiter,
            config: Arc::new(config),
            user_agent,
            cancel,
        }
    }

    /// The shared bucket registry.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// A descriptor for `route` carrying the configured retry cap.
    #[must_use]
    pub fn request(&self, route: Route) -> RequestDescriptor {
        RequestDescriptor::new(route).with_max_retries(self.config.max_retries)
    }

    /// Cancel every pending and future request with [`DispatchError::Shutdown`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Send `descriptor`, retrying rate limits and transient failures.
    ///
    /// The bucket permit is held from the first send until a terminal
    /// outcome, so a retried request keeps its place ahead of later ones.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Rejected`] for 4xx other than 429
    /// - [`DispatchError::RateLimitExhausted`] when 429s outlast the retry cap
    /// - [`DispatchError::TransportExhausted`] when 5xx or transport failures
    ///   outlast the retry cap
    /// - [`DispatchError::Shutdown`] if the dispatcher is shut down
    /// - [`DispatchError::InvalidRequest`] if the descriptor cannot be sent
    pub async fn send(&self, mut descriptor: RequestDescriptor) -> DispatchResult<HttpResponse> {
        descriptor.validate()?;
        let route = descriptor.route.clone();
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        let mut permit = self.limiter.acquire(&route, &self.cancel).await?;

        loop {
            let request = self.build_request(&descriptor);
            debug!(route = %route, attempt = descriptor.attempt, "sending request");

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(DispatchError::Shutdown),
                outcome = self.transport.execute(request) => outcome,
            };

            let (failure, delay) = match outcome {
                Ok(response) => {
                    let headers = RateLimitHeaders::from_response(&response);
                    self.limiter.record(&mut permit, &route, &headers);

                    match response.status {
                        200..=299 => return Ok(response),
                        429 => {
                            let retry = RetryAfter::from_response(&response, &headers);
                            if retry.global {
                                self.limiter.global().block_for(retry.wait);
                            }
                            if !descriptor.record_failure() {
                                warn!(route = %route, attempts = descriptor.attempt, "giving up after repeated rate limits");
                                return Err(DispatchError::RateLimitExhausted {
                                    attempts: descriptor.attempt,
                                });
                            }
                            warn!(
                                route = %route,
                                bucket = permit.bucket_hash().unwrap_or("unknown"),
                                delay_ms = retry.wait.as_millis(),
                                global = retry.global,
                                attempt = descriptor.attempt,
                                "rate limited, retrying"
                            );
                            clock::sleep_or_cancel(retry.wait, &self.cancel).await?;
                            permit = self.limiter.reacquire(permit, &route, &self.cancel).await?;
                            continue;
                        },
                        status if status >= 500 => {
                            (FailureKind::ServerStatus(status), backoff.next_delay())
                        },
                        status => {
                            debug!(route = %route, status, "request rejected");
                            return Err(DispatchError::Rejected {
                                status,
                                body: String::from_utf8_lossy(&response.body).into_owned(),
                            });
                        },
                    }
                },
                Err(e) => (FailureKind::Io(e.to_string()), backoff.next_delay()),
            };

            if !descriptor.record_failure() {
                warn!(route = %route, attempts = descriptor.attempt, failure = %failure, "giving up after repeated failures");
                return Err(DispatchError::TransportExhausted {
                    attempts: descriptor.attempt,
                    last_failure: failure,
                });
            }

            warn!(
                route = %route,
                failure = %failure,
                delay_ms = delay.as_millis(),
                attempt = descriptor.attempt,
                "request failed, retrying"
            );
            clock::sleep_or_cancel(delay, &self.cancel).await?;
            permit = self.limiter.reacquire(permit, &route, &self.cancel).await?;
        }
    }

    /// [`send`](Self::send) and decode a successful JSON body.
    ///
    /// # Errors
    ///
    /// Everything [`send`](Self::send) returns, plus [`DispatchError::Decode`].
    pub async fn send_json<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> DispatchResult<T> {
        let response = self.send(descriptor).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn build_request(&self, descriptor: &RequestDescriptor) -> HttpRequest {
        let mut headers = vec![
            ("Authorization".to_owned(), format!("Bot {}", self.config.token)),
            ("User-Agent".to_owned(), self.user_agent.to_string()),
        ];
        if let Some(content_type) = descriptor.body.content_type() {
            headers.push(("Content-Type".to_owned(), content_type));
        }
        if let Some(reason) = &descriptor.audit_log_reason {
            headers.push(("X-Audit-Log-Reason".to_owned(), reason.clone()));
        }
        headers.extend(descriptor.headers.iter().cloned());

        HttpRequest {
            method: descriptor.route.method(),
            url: format!(
                "{}{}",
                self.config.base_url.trim_end_matches('/'),
                descriptor.route.path()
            ),
            headers,
            body: descriptor.body.bytes().map(<[u8]>::to_vec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use crate::route::Method;

    struct Unreachable;

    #[async_trait::async_trait]
    impl HttpTransport for Unreachable {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> Result<HttpResponse, crate::error::TransportError> {
            Err(crate::error::TransportError::Connect("unreachable".into()))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig::new("secret").with_base_url("https://api.test/v10/"),
            Arc::new(Unreachable),
            Arc::new(RateLimiter::default()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn build_request_sets_standard_headers() {
        let dispatcher = dispatcher();
        let descriptor = dispatcher
            .request(Route::post("/channels/{channel_id}/messages").param("channel_id", 7))
            .with_body(RequestBody::json(&serde_json::json!({"content": "hi"})).unwrap())
            .with_audit_log_reason("cleanup");

        let request = dispatcher.build_request(&descriptor);
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://api.test/v10/channels/7/messages");
        assert_eq!(request.header("authorization"), Some("Bot secret"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("x-audit-log-reason"), Some("cleanup"));
        assert!(
            request
                .header("user-agent")
                .is_some_and(|ua| ua.starts_with("DiscordBot (https://github.com/dcore-rs/dcore, "))
        );
        assert!(request.body.is_some());
    }

    #[test]
    fn get_request_has_no_content_type() {
        let dispatcher = dispatcher();
        let request = dispatcher.build_request(&dispatcher.request(Route::get("/gateway/bot")));
        assert_eq!(request.header("content-type"), None);
        assert!(request.body.is_none());
    }

    #[test]
    fn request_uses_configured_cap() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new("t").with_max_retries(3),
            Arc::new(Unreachable),
            Arc::new(RateLimiter::default()),
            CancellationToken::new(),
        );
        assert_eq!(dispatcher.request(Route::get("/gateway/bot")).max_retries, 3);
    }

    #[test]
    fn debug_redacts_token() {
        let text = format!("{:?}", dispatcher());
        assert!(!text.contains("secret"));
        assert!(text.contains("has_token: true"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_shutdown_fails_fast() {
        let dispatcher = dispatcher();
        dispatcher.shutdown();
        let result = dispatcher.send(dispatcher.request(Route::get("/gateway/bot"))).await;
        assert!(matches!(result, Err(DispatchError::Shutdown)));
    }

    #[tokio::test]
    async fn invalid_descriptor_is_not_sent() {
        let dispatcher = dispatcher();
        let result = dispatcher.send(dispatcher.request(Route::get("/channels/{channel_id}"))).await;
        assert!(matches!(result, Err(DispatchError::InvalidRequest(_))));
    }
}
