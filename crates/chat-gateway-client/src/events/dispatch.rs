//! Decoded dispatch events

use serde_json::{Map, Value};

use super::payloads::{
    ChannelPayload, GuildBanEvent, GuildEmojisUpdateEvent, GuildIntegrationsUpdateEvent,
    GuildMemberAddEvent, GuildMemberRemoveEvent, GuildMemberUpdateEvent, GuildMembersChunkEvent,
    GuildPayload, GuildRoleDeleteEvent, GuildRoleEvent, MessageAckEvent, MessageDeleteBulkEvent,
    MessageDeleteEvent, MessagePayload, MessageReactionEvent, PresenceEvent, ReadyEvent,
    ResumedEvent, TypingStartEvent, UnavailableGuild, UserPayload, UserSettingsEvent,
    VoiceServerUpdateEvent, VoiceStatePayload,
};
use super::GatewayEventType;

/// Typed body of a dispatch
///
/// Kinds sharing a body shape share a variant; the exact kind is on
/// [`DispatchEvent::kind`].
#[derive(Debug, Clone)]
pub enum DispatchPayload {
    Ready(Box<ReadyEvent>),
    Resumed(ResumedEvent),
    Channel(Box<ChannelPayload>),
    Guild(Box<GuildPayload>),
    GuildDelete(UnavailableGuild),
    GuildBan(GuildBanEvent),
    GuildEmojisUpdate(GuildEmojisUpdateEvent),
    GuildIntegrationsUpdate(GuildIntegrationsUpdateEvent),
    GuildMemberAdd(Box<GuildMemberAddEvent>),
    GuildMemberRemove(GuildMemberRemoveEvent),
    GuildMemberUpdate(GuildMemberUpdateEvent),
    GuildMembersChunk(GuildMembersChunkEvent),
    GuildRole(GuildRoleEvent),
    GuildRoleDelete(GuildRoleDeleteEvent),
    Message(Box<MessagePayload>),
    MessageDelete(MessageDeleteEvent),
    MessageDeleteBulk(MessageDeleteBulkEvent),
    MessageReaction(MessageReactionEvent),
    MessageAck(MessageAckEvent),
    Presence(PresenceEvent),
    TypingStart(TypingStartEvent),
    User(UserPayload),
    UserSettings(UserSettingsEvent),
    VoiceState(VoiceStatePayload),
    VoiceServer(VoiceServerUpdateEvent),
    /// Event name outside the known table; body passed through untouched
    Unknown(Map<String, Value>),
}

impl DispatchPayload {
    /// Decode the `d` body of a known event kind
    pub fn decode(kind: GatewayEventType, body: Value) -> Result<Self, serde_json::Error> {
        use GatewayEventType as K;

        // Some kinds carry no body at all
        let body = if body.is_null() {
            Value::Object(Map::new())
        } else {
            body
        };

        Ok(match kind {
            K::Ready => Self::Ready(Box::new(serde_json::from_value(body)?)),
            K::Resumed => Self::Resumed(serde_json::from_value(body)?),
            K::ChannelCreate | K::ChannelUpdate | K::ChannelDelete => {
                Self::Channel(Box::new(serde_json::from_value(body)?))
            }
            K::GuildCreate | K::GuildUpdate => Self::Guild(Box::new(serde_json::from_value(body)?)),
            K::GuildDelete => Self::GuildDelete(serde_json::from_value(body)?),
            K::GuildBanAdd | K::GuildBanRemove => Self::GuildBan(serde_json::from_value(body)?),
            K::GuildEmojisUpdate => Self::GuildEmojisUpdate(serde_json::from_value(body)?),
            K::GuildIntegrationsUpdate => {
                Self::GuildIntegrationsUpdate(serde_json::from_value(body)?)
            }
            K::GuildMemberAdd => Self::GuildMemberAdd(Box::new(serde_json::from_value(body)?)),
            K::GuildMemberRemove => Self::GuildMemberRemove(serde_json::from_value(body)?),
            K::GuildMemberUpdate => Self::GuildMemberUpdate(serde_json::from_value(body)?),
            K::GuildMembersChunk => Self::GuildMembersChunk(serde_json::from_value(body)?),
            K::GuildRoleCreate | K::GuildRoleUpdate => Self::GuildRole(serde_json::from_value(body)?),
            K::GuildRoleDelete => Self::GuildRoleDelete(serde_json::from_value(body)?),
            K::MessageCreate | K::MessageUpdate => {
                Self::Message(Box::new(serde_json::from_value(body)?))
            }
            K::MessageDelete => Self::MessageDelete(serde_json::from_value(body)?),
            K::MessageDeleteBulk => Self::MessageDeleteBulk(serde_json::from_value(body)?),
            K::MessageReactionAdd | K::MessageReactionRemove => {
                Self::MessageReaction(serde_json::from_value(body)?)
            }
            K::MessageAck => Self::MessageAck(serde_json::from_value(body)?),
            K::PresenceUpdate => Self::Presence(serde_json::from_value(body)?),
            K::TypingStart => Self::TypingStart(serde_json::from_value(body)?),
            K::UserUpdate => Self::User(serde_json::from_value(body)?),
            K::UserSettingsUpdate => Self::UserSettings(serde_json::from_value(body)?),
            K::VoiceStateUpdate => Self::VoiceState(serde_json::from_value(body)?),
            K::VoiceServerUpdate => Self::VoiceServer(serde_json::from_value(body)?),
        })
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// What subscribers receive for every dispatch
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub sequence: u64,
    /// Raw `t` value as sent by the server
    pub event_type: String,
    /// `None` when the name is outside the known table
    pub kind: Option<GatewayEventType>,
    pub payload: DispatchPayload,
}

impl std::fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DispatchEvent(t={}, s={})", self.event_type, self.sequence)
    }
}
