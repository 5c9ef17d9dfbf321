//! Test fixtures
//!
//! Canned server frames for driving a session.

use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "test-token";

pub const HEARTBEAT_INTERVAL_MS: u64 = 41_250;

pub fn hello(heartbeat_interval: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}})
}

pub fn ready(session_id: &str, seq: u64) -> Value {
    dispatch(
        "READY",
        seq,
        json!({
            "v": 6,
            "user": {
                "id": "80351110224678912",
                "username": "nelly",
                "discriminator": "1337",
                "bot": false
            },
            "session_id": session_id,
            "guilds": [{"id": "41771983423143937", "unavailable": true}]
        }),
    )
}

pub fn resumed(seq: u64) -> Value {
    dispatch("RESUMED", seq, json!({"_trace": ["gateway-prd-main-1"]}))
}

pub fn message_create(seq: u64, content: &str) -> Value {
    dispatch(
        "MESSAGE_CREATE",
        seq,
        json!({
            "id": "334385199974967042",
            "channel_id": "290926798999357250",
            "author": {"id": "80351110224678912", "username": "nelly", "discriminator": "1337"},
            "content": content,
            "timestamp": "2017-07-11T17:27:07.299000+00:00",
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "mention_roles": [],
            "attachments": [],
            "embeds": [],
            "pinned": false
        }),
    )
}

pub fn dispatch(event_type: &str, seq: u64, body: Value) -> Value {
    json!({"op": 0, "t": event_type, "s": seq, "d": body})
}

pub fn reconnect() -> Value {
    json!({"op": 7, "d": null})
}

pub fn invalid_session(resumable: bool) -> Value {
    json!({"op": 9, "d": resumable})
}

pub fn heartbeat_request() -> Value {
    json!({"op": 1, "d": null})
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11})
}

pub fn error_notice(message: &str) -> Value {
    json!({"message": message, "op": 0})
}
