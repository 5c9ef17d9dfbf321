//! Gateway events
//!
//! Event names, typed dispatch bodies, and the decoded event handed to subscribers.

mod dispatch;
mod event_types;
mod payloads;
mod snowflake;

pub use dispatch::{DispatchEvent, DispatchPayload};
pub use event_types::GatewayEventType;
pub use payloads::{
    AttachmentPayload, ChannelPayload, EmojiPayload, GamePayload, GuildBanEvent,
    GuildEmojisUpdateEvent, GuildIntegrationsUpdateEvent, GuildMemberAddEvent,
    GuildMemberRemoveEvent, GuildMemberUpdateEvent, GuildMembersChunkEvent, GuildPayload,
    GuildRoleDeleteEvent, GuildRoleEvent, MemberPayload, MessageAckEvent, MessageDeleteBulkEvent,
    MessageDeleteEvent, MessagePayload, MessageReactionEvent, PresenceEvent, ReactionEmoji,
    ReadyEvent, ResumedEvent, RolePayload, TypingStartEvent, UnavailableGuild, UserIdPayload,
    UserPayload, UserSettingsEvent, VoiceServerUpdateEvent, VoiceStatePayload,
};
pub use snowflake::{Snowflake, SnowflakeParseError};
