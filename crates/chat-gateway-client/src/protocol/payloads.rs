//! Control frame bodies
//!
//! `HelloPayload` is received from the server; the rest are sent by the client.

use serde::{Deserialize, Serialize};

use crate::events::{GamePayload, Snowflake};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    /// Gateway protocol version
    pub v: u8,
    /// Member count above which a guild's offline members are omitted
    pub large_threshold: u32,
    pub compress: bool,
    pub properties: IdentifyProperties,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub referrer: String,
    pub referring_domain: String,
}

impl From<&chat_common::ConnectionProperties> for IdentifyProperties {
    fn from(props: &chat_common::ConnectionProperties) -> Self {
        Self {
            os: props.os.clone(),
            browser: props.browser.clone(),
            referrer: props.referrer.clone(),
            referring_domain: props.referring_domain.clone(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: i64,
}

/// Payload for op 3 (StatusUpdate)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    /// Unix time in milliseconds since the client went idle, `None` when active
    pub idle_since: Option<u64>,
    pub game: Option<GamePayload>,
}

impl StatusUpdatePayload {
    /// Mark the client active and playing `name`
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            idle_since: None,
            game: Some(GamePayload { name: name.into() }),
        }
    }
}

/// Payload for op 4 (VoiceStateUpdate)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Snowflake,
    /// `None` leaves voice
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Payload for op 8 (RequestGuildMembers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,
    /// Username prefix, empty for everyone
    pub query: String,
    /// 0 for no limit
    pub limit: u32,
}

impl RequestGuildMembersPayload {
    /// Request every member of a guild
    #[must_use]
    pub fn all(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            query: String::new(),
            limit: 0,
        }
    }
}
