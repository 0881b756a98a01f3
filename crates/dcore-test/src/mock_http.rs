//! Scripted HTTP transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dcore_http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use tokio::time::Instant;

/// What the mock answers with.
pub type MockReply = Result<HttpResponse, TransportError>;

/// A request seen by [`MockHttpTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request as sent.
    pub request: HttpRequest,
    /// When it reached the transport.
    pub at: Instant,
}

impl RecordedRequest {
    /// Path portion of the URL, after the host.
    #[must_use]
    pub fn path(&self) -> &str {
        let url = self.request.url.as_str();
        let after_scheme = url.find("://").map_or(url, |i| &url[i.saturating_add(3)..]);
        after_scheme.find('/').map_or("", |i| &after_scheme[i..])
    }
}

#[derive(Debug, Default)]
struct Script {
    by_path: HashMap<String, VecDeque<MockReply>>,
    queue: VecDeque<MockReply>,
    fallback: Option<MockReply>,
}

/// [`HttpTransport`] answering from scripted replies.
///
/// Replies are chosen in this order: the queue registered for the request's
/// URL suffix, the shared queue, the fallback, then an empty `200`.
#[derive(Debug, Clone, Default)]
pub struct MockHttpTransport {
    script: Arc<Mutex<Script>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    latency: Duration,
}

impl MockHttpTransport {
    /// A transport answering `200` to everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response on the shared queue.
    #[must_use]
    pub fn with_response(self, response: HttpResponse) -> Self {
        self.lock_script().queue.push_back(Ok(response));
        self
    }

    /// Queue a transport failure on the shared queue.
    #[must_use]
    pub fn with_error(self, error: TransportError) -> Self {
        self.lock_script().queue.push_back(Err(error));
        self
    }

    /// Queue a reply for requests whose URL ends with `path`.
    #[must_use]
    pub fn with_path_reply(self, path: &str, reply: MockReply) -> Self {
        self.lock_script()
            .by_path
            .entry(path.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used once every queue is empty.
    #[must_use]
    pub fn with_fallback(self, response: HttpResponse) -> Self {
        self.lock_script().fallback = Some(Ok(response));
        self
    }

    /// Delay every reply by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response after construction.
    pub fn push_response(&self, response: HttpResponse) {
        self.lock_script().queue.push_back(Ok(response));
    }

    /// Every request seen so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests seen so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, url: &str) -> MockReply {
        let mut script = self.lock_script();
        let by_path = script
            .by_path
            .iter_mut()
            .find(|(path, queue)| url.ends_with(path.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        by_path
            .or_else(|| script.queue.pop_front())
            .or_else(|| script.fallback.clone())
            .unwrap_or_else(|| Ok(HttpResponse::new(200)))
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                request,
                at: Instant::now(),
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_reply(&url)
    }
}

/// A `200` carrying a full set of rate-limit headers.
#[must_use]
pub fn limited_response(bucket: &str, remaining: u32, limit: u32, reset_after_secs: f64) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("x-ratelimit-bucket", bucket)
        .with_header("x-ratelimit-limit", limit.to_string())
        .with_header("x-ratelimit-remaining", remaining.to_string())
        .with_header("x-ratelimit-reset-after", reset_after_secs.to_string())
}

/// A `429` whose body asks for `retry_after_secs`.
#[must_use]
pub fn too_many_requests(retry_after_secs: f64, global: bool) -> HttpResponse {
    let mut response = HttpResponse::new(429)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "message": "You are being rate limited.",
                "retry_after": retry_after_secs,
                "global": global,
            })
            .to_string(),
        );
    if global {
        response = response.with_header("x-ratelimit-global", "true");
    }
    response
}
