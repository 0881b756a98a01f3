//! Client wiring: discovery, shard start-up, and shutdown.

use std::sync::Arc;

use dcore_client::config::Config;
use dcore_client::gateway::GatewayStatus;
use dcore_client::gateway::protocol::opcode;
use dcore_client::http::{DispatchError, HttpResponse, Route};
use dcore_client::{Client, ClientError};
use dcore_test::{MockGateway, MockHttpTransport, init_test_logging};

fn gateway_bot(url: &str, shards: u32, remaining: u32, max_concurrency: u32) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "url": url,
                "shards": shards,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": remaining,
                    "reset_after": 14_400_000,
                    "max_concurrency": max_concurrency,
                },
            })
            .to_string(),
        )
}

fn config(extra: &str) -> Config {
    Config::from_toml_str(&format!("token = \"secret\"\n{extra}")).unwrap()
}

fn client(config: Config, http: &MockHttpTransport, gateway: &MockGateway) -> Client {
    Client::builder(config)
        .with_transport(Arc::new(http.clone()))
        .with_connector(Arc::new(gateway.clone()))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn discovery_starts_the_recommended_shards() {
    init_test_logging();
    let http = MockHttpTransport::new().with_path_reply(
        "/gateway/bot",
        Ok(gateway_bot("wss://gateway.discord.gg", 2, 1000, 1)),
    );
    let gateway = MockGateway::new();
    let mut client = client(config(""), &http, &gateway);

    let mut events = client.start().await.unwrap();
    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path(), "/api/v10/gateway/bot");
    assert_eq!(client.shard_ids(), &[0, 1]);

    for n in 0..2u64 {
        let mut conn = gateway.next_connection().await.unwrap();
        assert!(conn.url().starts_with("wss://gateway.discord.gg"));
        conn.hello(41_250);
        let identify = conn.expect_op(opcode::IDENTIFY).await.unwrap().d.unwrap();
        assert_eq!(identify["token"], "secret");
        assert_eq!(identify["shard"][1], 2);
        conn.ready(1, &format!("session-{n}"), "wss://gateway.discord.gg");
        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "READY");
    }
    assert_eq!(client.status(0), Some(GatewayStatus::Connected));
    assert_eq!(client.status(1), Some(GatewayStatus::Connected));
    assert_eq!(client.status(2), None);

    client.shutdown();
    for (shard_id, result) in client.join().await {
        assert!(result.is_ok(), "shard {shard_id}: {result:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn pinned_gateway_skips_discovery() {
    let http = MockHttpTransport::new();
    let gateway = MockGateway::new();
    let config = config(
        r#"
[gateway]
url = "wss://pinned.discord.gg"
shard_count = 4
shard_ids = [3]
"#,
    );
    let mut client = client(config, &http, &gateway);

    let _events = client.start().await.unwrap();
    let mut conn = gateway.next_connection().await.unwrap();
    assert!(conn.url().starts_with("wss://pinned.discord.gg"));
    conn.hello(41_250);
    let identify = conn.expect_op(opcode::IDENTIFY).await.unwrap().d.unwrap();
    assert_eq!(identify["shard"], serde_json::json!([3, 4]));

    assert_eq!(http.request_count(), 0);
    assert_eq!(client.shard_ids(), &[3]);

    client.shutdown();
    assert_eq!(client.join().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pinned_count_still_discovers_url() {
    let http = MockHttpTransport::new().with_path_reply(
        "/gateway/bot",
        Ok(gateway_bot("wss://discovered.discord.gg", 8, 1000, 1)),
    );
    let gateway = MockGateway::new();
    let mut client = client(config("[gateway]\nshard_count = 1\n"), &http, &gateway);

    let _events = client.start().await.unwrap();
    let conn = gateway.next_connection().await.unwrap();
    assert!(conn.url().starts_with("wss://discovered.discord.gg"));
    assert_eq!(client.shard_ids(), &[0]);

    client.shutdown();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let http = MockHttpTransport::new();
    let gateway = MockGateway::new();
    let config = config("[gateway]\nurl = \"wss://gateway.discord.gg\"\nshard_count = 1\n");
    let mut client = client(config, &http, &gateway);

    let _events = client.start().await.unwrap();
    assert!(matches!(client.start().await, Err(ClientError::AlreadyStarted)));

    client.shutdown();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn failed_discovery_surfaces_the_request_error() {
    let http = MockHttpTransport::new().with_path_reply("/gateway/bot", Ok(HttpResponse::new(401)));
    let gateway = MockGateway::new();
    let mut client = client(config(""), &http, &gateway);

    let err = client.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Dispatch(DispatchError::Rejected { .. })), "{err:?}");
    assert_eq!(gateway.connect_attempts(), 0);
    assert!(client.shard_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_requests() {
    let http = MockHttpTransport::new();
    let gateway = MockGateway::new();
    let client = client(config(""), &http, &gateway);

    client.shutdown();
    let request = client.dispatcher().request(Route::get("/users/@me"));
    let err = client.dispatcher().send(request).await.unwrap_err();
    assert!(matches!(err, DispatchError::Shutdown));
    assert!(client.join().await.is_empty());
}

#[test]
fn missing_token_fails_to_build() {
    let err = Client::builder(Config::default())
        .with_transport(Arc::new(MockHttpTransport::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}

#[test]
fn requests_share_the_client_limiter() {
    let http = MockHttpTransport::new();
    let gateway = MockGateway::new();
    let client = client(config(""), &http, &gateway);
    assert!(Arc::ptr_eq(client.limiter(), client.dispatcher().limiter()));
}
