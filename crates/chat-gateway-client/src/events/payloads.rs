//! Event payload definitions
//!
//! Typed bodies for each dispatch kind. Only the fields a client needs are
//! modelled; anything else the server sends is ignored.

use super::Snowflake;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// === Connection Events ===

/// READY event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    pub v: u8,
    pub user: UserPayload,
    /// Session ID for resuming
    pub session_id: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    /// Older protocol versions announce the heartbeat interval here instead of in Hello
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,
}

/// RESUMED event payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumedEvent {
    #[serde(default, rename = "_trace")]
    pub trace: Vec<String>,
}

/// Guild stub in READY, and the GUILD_DELETE body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

// === User Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// Partial user with just ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdPayload {
    pub id: Snowflake,
}

/// USER_SETTINGS_UPDATE payload; settings vary by client so unmodelled keys are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettingsEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// === Channel Events ===

/// Channel body for CHANNEL_CREATE / UPDATE / DELETE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<Snowflake>,
    /// Present on private channels
    #[serde(default)]
    pub recipients: Vec<UserPayload>,
}

// === Guild Events ===

/// GUILD_CREATE / GUILD_UPDATE payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildPayload {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub channels: Vec<ChannelPayload>,
    #[serde(default)]
    pub roles: Vec<RolePayload>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub emojis: Vec<EmojiPayload>,
    #[serde(default)]
    pub voice_states: Vec<VoiceStatePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildBanEvent {
    pub guild_id: Snowflake,
    pub user: UserPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiPayload {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub require_colons: bool,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildEmojisUpdateEvent {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub emojis: Vec<EmojiPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildIntegrationsUpdateEvent {
    pub guild_id: Snowflake,
}

// === Role Events ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePayload {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub position: i32,
    /// Permission bit set
    #[serde(default)]
    pub permissions: Value,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub mentionable: bool,
}

/// GUILD_ROLE_CREATE / GUILD_ROLE_UPDATE payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleEvent {
    pub guild_id: Snowflake,
    pub role: RolePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleDeleteEvent {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

// === Member Events ===

/// Member data included in events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPayload {
    pub user: UserPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

/// GUILD_MEMBER_ADD payload: a member plus the guild it joined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberAddEvent {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: MemberPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberRemoveEvent {
    pub guild_id: Snowflake,
    pub user: UserPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberUpdateEvent {
    pub guild_id: Snowflake,
    pub user: UserPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

/// GUILD_MEMBERS_CHUNK payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkEvent {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
}

// === Message Events ===

/// MESSAGE_CREATE / MESSAGE_UPDATE payload
///
/// Updates may be partial, so everything past the ids is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<UserPayload>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub id: Snowflake,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteEvent {
    pub id: Snowflake,
    pub channel_id: Snowflake,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteBulkEvent {
    pub ids: Vec<Snowflake>,
    pub channel_id: Snowflake,
}

/// MESSAGE_REACTION_ADD / MESSAGE_REACTION_REMOVE payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    pub emoji: ReactionEmoji,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEmoji {
    /// `None` for unicode emoji
    #[serde(default)]
    pub id: Option<Snowflake>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAckEvent {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
}

// === Presence Events ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user: UserIdPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<GamePayload>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

/// Game shown next to a user's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStartEvent {
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

// === Voice Events ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    /// `None` once the user left voice
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    pub user_id: Snowflake,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub suppress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceServerUpdateEvent {
    pub token: String,
    pub guild_id: Snowflake,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_event_without_interval() {
        let ready: ReadyEvent = serde_json::from_value(json!({
            "v": 6,
            "user": {"id": "80351110224678912", "username": "Nelly", "discriminator": "1337"},
            "session_id": "abc123",
            "guilds": [{"id": "41771983423143937", "unavailable": true}]
        }))
        .unwrap();

        assert_eq!(ready.session_id, "abc123");
        assert_eq!(ready.user.id, Snowflake::new(80_351_110_224_678_912));
        assert!(ready.guilds[0].unavailable);
        assert!(ready.heartbeat_interval.is_none());
    }

    #[test]
    fn test_ready_event_requires_session_id() {
        let result = serde_json::from_value::<ReadyEvent>(json!({
            "v": 6,
            "user": {"id": "1"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_member_add_flattens_member() {
        let event: GuildMemberAddEvent = serde_json::from_value(json!({
            "guild_id": "10",
            "user": {"id": "11", "username": "someone"},
            "roles": ["12"],
            "joined_at": "2016-06-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.guild_id, Snowflake::new(10));
        assert_eq!(event.member.user.username, "someone");
        assert_eq!(event.member.roles, vec![Snowflake::new(12)]);
    }

    #[test]
    fn test_partial_message_update() {
        let update: MessagePayload = serde_json::from_value(json!({
            "id": "5",
            "channel_id": "6",
            "embeds": [{"title": "link preview"}]
        }))
        .unwrap();

        assert!(update.content.is_none());
        assert!(update.author.is_none());
        assert_eq!(update.embeds.len(), 1);
    }

    #[test]
    fn test_user_settings_keeps_unknown_keys() {
        let settings: UserSettingsEvent = serde_json::from_value(json!({
            "status": "idle",
            "theme": "dark"
        }))
        .unwrap();

        assert_eq!(settings.status.as_deref(), Some("idle"));
        assert_eq!(settings.other.get("theme"), Some(&json!("dark")));
    }
}
