//! Gateway wire types, opcodes, and payload builders.
//!
//! Only the opcodes and fields the session itself needs are modelled;
//! dispatch payloads are forwarded as opaque `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// Gateway opcodes.
pub mod opcode {
    /// A named event with a sequence number.
    pub const DISPATCH: u8 = 0;
    /// Heartbeat. The server may also send one to demand an immediate beat.
    pub const HEARTBEAT: u8 = 1;
    /// Identify (send only).
    pub const IDENTIFY: u8 = 2;
    /// Resume (send only).
    pub const RESUME: u8 = 6;
    /// The server wants the client to reconnect and resume.
    pub const RECONNECT: u8 = 7;
    /// The session cannot be resumed, or can only be resumed (`d`).
    pub const INVALID_SESSION: u8 = 9;
    /// Hello, carries the heartbeat interval (receive only).
    pub const HELLO: u8 = 10;
    /// Acknowledges the last heartbeat.
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// `GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES`.
pub const DEFAULT_INTENTS: u32 = (1 << 0) | (1 << 9) | (1 << 12);

/// Gateway protocol version requested on connect.
pub const GATEWAY_VERSION: u8 = 10;

/// One gateway frame, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,
    /// Body; its shape depends on `op`.
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    /// Sequence number, dispatches only.
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name, dispatches only.
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    fn control(op: u8, d: serde_json::Value) -> Self {
        Self {
            op,
            d: Some(d),
            s: None,
            t: None,
        }
    }
}

/// Body of the first frame the server sends.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HelloPayload {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// Fields of the READY dispatch the session keeps.
#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    /// Id presented on Resume.
    pub session_id: String,
    /// Where to reconnect when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Response from `GET /gateway/bot`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    /// Gateway URL.
    pub url: String,
    /// Recommended number of shards.
    pub shards: u32,
    /// Identify budget for the current window.
    pub session_start_limit: SessionStartLimit,
}

/// The `session_start_limit` object of `GET /gateway/bot`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Identifies allowed per window.
    pub total: u32,
    /// Identifies left in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets.
    pub reset_after: u64,
    /// Identifies allowed per 5 seconds.
    pub max_concurrency: u32,
}

// ── Outbound ─────────────────────────────────────────────────

/// Everything an Identify carries.
#[derive(Debug, Clone)]
pub struct IdentifyParams<'a> {
    /// Bot token.
    pub token: &'a str,
    /// Intents bitmask.
    pub intents: u32,
    /// `[shard_id, shard_count]`.
    pub shard: [u32; 2],
    /// Member count above which offline members are omitted.
    pub large_threshold: u32,
    /// Initial presence.
    pub presence: Option<&'a serde_json::Value>,
}

/// Identify (`op 2`) for a fresh session.
#[must_use]
pub fn build_identify(params: &IdentifyParams<'_>) -> GatewayPayload {
    let mut d = serde_json::json!({
        "token": params.token,
        "intents": params.intents,
        "shard": params.shard,
        "large_threshold": params.large_threshold,
        "properties": {
            "os": std::env::consts::OS,
            "browser": "dcore",
            "device": "dcore",
        },
    });
    if let (Some(presence), Some(map)) = (params.presence, d.as_object_mut()) {
        map.insert("presence".to_owned(), presence.clone());
    }
    GatewayPayload::control(opcode::IDENTIFY, d)
}

/// Resume (`op 6`) picking up after `seq`.
#[must_use]
pub fn build_resume(token: &str, session_id: &str, sequence: u64) -> GatewayPayload {
    GatewayPayload::control(
        opcode::RESUME,
        serde_json::json!({
            "token": token,
            "session_id": session_id,
            "seq": sequence,
        }),
    )
}

/// Heartbeat (`op 1`) carrying the last sequence seen, or null.
#[must_use]
pub fn build_heartbeat(sequence: Option<u64>) -> GatewayPayload {
    GatewayPayload {
        op: opcode::HEARTBEAT,
        d: sequence.map(serde_json::Value::from),
        s: None,
        t: None,
    }
}

// ── URLs ─────────────────────────────────────────────────────

/// Hosts (and their subdomains) a READY may point resumes at.
const ALLOWED_RESUME_DOMAINS: &[&str] = &["discord.gg"];

/// Validate that a resume gateway URL is `wss://` on an allowed domain.
#[must_use]
pub fn is_valid_resume_url(raw: &str) -> bool {
    let Ok(url) = url::Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "wss" {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    ALLOWED_RESUME_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Append the version and encoding query to a gateway base URL.
#[must_use]
pub fn connect_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/?v={GATEWAY_VERSION}&encoding=json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> IdentifyParams<'static> {
        IdentifyParams {
            token: "test-token",
            intents: 513,
            shard: [1, 4],
            large_threshold: 100,
            presence: None,
        }
    }

    #[test]
    fn identify_payload_fields() {
        let payload = build_identify(&params());
        assert_eq!(payload.op, opcode::IDENTIFY);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "test-token");
        assert_eq!(d["intents"], 513);
        assert_eq!(d["shard"], serde_json::json!([1, 4]));
        assert_eq!(d["large_threshold"], 100);
        assert_eq!(d["properties"]["browser"], "dcore");
        assert!(d.get("presence").is_none());
    }

    #[test]
    fn identify_includes_presence_when_set() {
        let presence = serde_json::json!({"status": "idle", "afk": false});
        let mut p = params();
        p.presence = Some(&presence);
        let d = build_identify(&p).d.unwrap();
        assert_eq!(d["presence"]["status"], "idle");
    }

    #[test]
    fn resume_payload_fields() {
        let payload = build_resume("tok", "session-123", 42);
        assert_eq!(payload.op, opcode::RESUME);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "tok");
        assert_eq!(d["session_id"], "session-123");
        assert_eq!(d["seq"], 42);
    }

    #[test]
    fn heartbeat_carries_sequence() {
        let payload = build_heartbeat(Some(7));
        assert_eq!(payload.op, opcode::HEARTBEAT);
        assert_eq!(payload.d, Some(serde_json::json!(7)));

        let json = serde_json::to_string(&build_heartbeat(None)).unwrap();
        assert!(json.contains("\"d\":null"));
    }

    #[test]
    fn dispatch_payload_deserializes() {
        let json = r#"{"op":0,"d":{"content":"hi"},"s":5,"t":"MESSAGE_CREATE"}"#;
        let payload: GatewayPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.op, opcode::DISPATCH);
        assert_eq!(payload.s, Some(5));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn ready_payload_without_resume_url() {
        let ready: ReadyPayload =
            serde_json::from_str(r#"{"session_id":"abc","v":10}"#).unwrap();
        assert_eq!(ready.session_id, "abc");
        assert!(ready.resume_gateway_url.is_none());
    }

    #[test]
    fn gateway_bot_info_deserializes() {
        let json = r#"{
            "url": "wss://gateway.discord.gg",
            "shards": 3,
            "session_start_limit": {
                "total": 1000, "remaining": 998, "reset_after": 86400000, "max_concurrency": 1
            }
        }"#;
        let info: GatewayBotInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.shards, 3);
        assert_eq!(info.session_start_limit.max_concurrency, 1);
        assert_eq!(info.session_start_limit.remaining, 998);
    }

    #[test]
    fn resume_url_validation() {
        assert!(is_valid_resume_url("wss://gateway.discord.gg"));
        assert!(is_valid_resume_url("wss://gateway-us-east1-b.discord.gg/"));
        assert!(is_valid_resume_url("wss://discord.gg:443/?v=10"));
        assert!(!is_valid_resume_url("ws://gateway.discord.gg"));
        assert!(!is_valid_resume_url("wss://discord.gg.evil.com"));
        assert!(!is_valid_resume_url("wss://evildiscord.gg"));
        assert!(!is_valid_resume_url("not a url"));
    }

    #[test]
    fn connect_url_appends_query() {
        assert_eq!(
            connect_url("wss://gateway.discord.gg"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            connect_url("wss://gateway.discord.gg/"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
    }
}
