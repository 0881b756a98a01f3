//! The top-level client.

use std::sync::Arc;
use std::time::Duration;

use dcore_config::Config;
use dcore_gateway::{
    GatewayBotInfo, GatewayConnector, GatewayEvent, GatewayResult, GatewayStatus, ShardManager,
    TungsteniteConnector,
};
use dcore_http::{Dispatcher, HttpTransport, RateLimiter, ReqwestTransport, Route};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};
use crate::settings;

/// Builds a [`Client`] from a loaded [`Config`].
///
/// The HTTP transport and gateway connector default to the `reqwest` and
/// `tokio-tungstenite` adapters.
pub struct ClientBuilder {
    config: Config,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn GatewayConnector>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            connector: None,
        }
    }

    /// Send requests through `transport`.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Open gateway connections through `connector`.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn GatewayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the client. No connection is opened until [`Client::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured or the default HTTP
    /// transport cannot be built.
    pub fn build(self) -> ClientResult<Client> {
        let dispatcher_config = settings::dispatcher_config(&self.config)?;
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(Duration::from_secs(
                self.config.http.request_timeout_secs,
            ))?),
        };
        let connector: Arc<dyn GatewayConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector),
        };

        let cancel = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::new(self.config.http.global_requests_per_second));
        let dispatcher = Dispatcher::new(
            dispatcher_config,
            transport,
            limiter,
            cancel.child_token(),
        );

        Ok(Client {
            config: self.config,
            dispatcher,
            connector,
            cancel,
            shards: None,
        })
    }
}

/// Owns the rate-limit registry, the request dispatcher, and the shards.
///
/// Every request made through [`Client::dispatcher`] shares one
/// [`RateLimiter`], so per-route buckets and the global budget are honoured
/// across callers.
pub struct Client {
    config: Config,
    dispatcher: Dispatcher,
    connector: Arc<dyn GatewayConnector>,
    cancel: CancellationToken,
    shards: Option<ShardManager>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dispatcher", &self.dispatcher)
            .field("started", &self.shards.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client with the default transports.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::build`].
    pub fn new(config: Config) -> ClientResult<Self> {
        ClientBuilder::new(config).build()
    }

    /// Shortcut for [`ClientBuilder::new`].
    #[must_use]
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The request dispatcher. Clones share this client's buckets.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The shared bucket registry.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.dispatcher.limiter()
    }

    /// The configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ask the API for the gateway URL, recommended shard count and
    /// session-start budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body does not parse.
    pub async fn gateway_info(&self) -> ClientResult<GatewayBotInfo> {
        let request = self.dispatcher.request(Route::get("/gateway/bot"));
        Ok(self.dispatcher.send_json(request).await?)
    }

    /// Start every configured shard and return the shared event stream.
    ///
    /// `GET /gateway/bot` is consulted only when the configuration does not
    /// pin both the gateway URL and the shard count.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyStarted`] on a second call, or an
    /// error if gateway discovery fails.
    pub async fn start(&mut self) -> ClientResult<mpsc::Receiver<GatewayEvent>> {
        if self.shards.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let pinned_url = self.config.gateway.url.clone();
        let pinned_count = self.config.gateway.shard_count;
        let (url, shard_count, start_limit) = match (pinned_url, pinned_count) {
            (Some(url), Some(count)) => (url, count, None),
            (url, count) => {
                let info = self.gateway_info().await?;
                info!(
                    recommended_shards = info.shards,
                    remaining = info.session_start_limit.remaining,
                    max_concurrency = info.session_start_limit.max_concurrency,
                    "Gateway discovered"
                );
                (
                    url.unwrap_or(info.url),
                    count.unwrap_or(info.shards),
                    Some(info.session_start_limit),
                )
            }
        };
        let shard_count = shard_count.max(1);
        let shard_ids = self
            .config
            .gateway
            .shard_ids
            .clone()
            .unwrap_or_else(|| (0..shard_count).collect());

        if let Some(limit) = &start_limit
            && usize::try_from(limit.remaining).unwrap_or(usize::MAX) < shard_ids.len()
        {
            warn!(
                remaining = limit.remaining,
                shards = shard_ids.len(),
                reset_after_ms = limit.reset_after,
                "Session start budget is lower than the shard count"
            );
        }
        let max_concurrency = start_limit.map_or(1, |limit| limit.max_concurrency);

        let template = settings::session_config(&self.config)?.with_shard(0, shard_count);
        let (tx, rx) = mpsc::channel(self.config.gateway.event_buffer.max(1));
        let mut manager = ShardManager::new(
            template,
            url,
            Arc::clone(&self.connector),
            tx,
            self.cancel.child_token(),
        )
        .with_shard_ids(shard_ids)
        .with_max_concurrency(max_concurrency);
        manager.start();
        self.shards = Some(manager);
        Ok(rx)
    }

    /// Status of `shard_id`, or `None` if it is not run by this client.
    #[must_use]
    pub fn status(&self, shard_id: u32) -> Option<GatewayStatus> {
        self.shards.as_ref().and_then(|m| m.status(shard_id))
    }

    /// Shard ids run by this client. Empty before [`Client::start`].
    #[must_use]
    pub fn shard_ids(&self) -> &[u32] {
        match &self.shards {
            Some(manager) => manager.shard_ids(),
            None => &[],
        }
    }

    /// Stop every shard and fail every pending request with a shutdown
    /// error.
    pub fn shutdown(&self) {
        info!("Client shutting down");
        self.cancel.cancel();
    }

    /// Wait for every shard to finish.
    pub async fn join(self) -> Vec<(u32, GatewayResult<()>)> {
        match self.shards {
            Some(manager) => manager.join().await,
            None => Vec::new(),
        }
    }
}
