//! Gateway protocol definitions
//!
//! Op codes, close codes, outbound frame encoding and inbound frame decoding.

mod close_codes;
mod codec;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use codec::{decode, decode_value, GatewayEnvelope};
pub use messages::{GatewayMessage, OutboundFrame};
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, RequestGuildMembersPayload, ResumePayload,
    StatusUpdatePayload, VoiceStateUpdatePayload,
};
