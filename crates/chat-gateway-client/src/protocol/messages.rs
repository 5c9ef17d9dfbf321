//! Outbound gateway frames
//!
//! Every frame the client sends is `{"op": <int>, "d": <body>}`.

use super::{
    IdentifyPayload, OpCode, RequestGuildMembersPayload, ResumePayload, StatusUpdatePayload,
    VoiceStateUpdatePayload,
};
use serde::Serialize;
use serde_json::Value;

/// Wire envelope for client frames
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: OpCode,
    pub d: Value,
}

impl GatewayMessage {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame the client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Last sequence received, -1 before any dispatch
    Heartbeat(i64),
    Identify(IdentifyPayload),
    Resume(ResumePayload),
    StatusUpdate(StatusUpdatePayload),
    VoiceStateUpdate(VoiceStateUpdatePayload),
    RequestGuildMembers(RequestGuildMembersPayload),
}

impl OutboundFrame {
    #[must_use]
    pub const fn op(&self) -> OpCode {
        match self {
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
            Self::StatusUpdate(_) => OpCode::StatusUpdate,
            Self::VoiceStateUpdate(_) => OpCode::VoiceStateUpdate,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
        }
    }

    /// Build the wire envelope
    pub fn to_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        let d = match self {
            Self::Heartbeat(seq) => Value::from(*seq),
            Self::Identify(body) => serde_json::to_value(body)?,
            Self::Resume(body) => serde_json::to_value(body)?,
            Self::StatusUpdate(body) => serde_json::to_value(body)?,
            Self::VoiceStateUpdate(body) => serde_json::to_value(body)?,
            Self::RequestGuildMembers(body) => serde_json::to_value(body)?,
        };
        Ok(GatewayMessage { op: self.op(), d })
    }

    /// Encode to the JSON text sent over the socket
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_message()?.to_json()
    }
}

impl std::fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the body: Identify and Resume carry the token
        write!(f, "OutboundFrame(op={})", self.op())
    }
}
