//! Inbound frame decoding
//!
//! Routes each raw frame to a typed envelope by op code and, for dispatches,
//! by event name.

use serde_json::{Map, Value};

use super::{HelloPayload, OpCode};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{DispatchEvent, DispatchPayload, GatewayEventType};

/// A decoded inbound frame
#[derive(Debug, Clone)]
pub enum GatewayEnvelope {
    /// Server reported an error instead of a frame; op and body are meaningless
    ErrorNotice { message: String },
    Dispatch(DispatchEvent),
    Hello(HelloPayload),
    InvalidSession { resumable: bool },
    /// Any other op code; the body is ignored
    Control { op: OpCode },
}

impl GatewayEnvelope {
    /// Op code, `None` for error notices
    #[must_use]
    pub fn op(&self) -> Option<OpCode> {
        match self {
            Self::ErrorNotice { .. } => None,
            Self::Dispatch(_) => Some(OpCode::Dispatch),
            Self::Hello(_) => Some(OpCode::Hello),
            Self::InvalidSession { .. } => Some(OpCode::InvalidSession),
            Self::Control { op } => Some(*op),
        }
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Dispatch(event) => Some(event.sequence),
            _ => None,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Dispatch(event) => Some(&event.event_type),
            _ => None,
        }
    }

    #[must_use]
    pub fn error_notice(&self) -> Option<&str> {
        match self {
            Self::ErrorNotice { message } => Some(message),
            _ => None,
        }
    }
}

/// Decode one text frame
pub fn decode(text: &str) -> GatewayResult<GatewayEnvelope> {
    let value: Value = serde_json::from_str(text)?;
    decode_value(value)
}

/// Decode an already parsed frame
pub fn decode_value(value: Value) -> GatewayResult<GatewayEnvelope> {
    let Value::Object(mut frame) = value else {
        return Err(GatewayError::protocol("frame is not a JSON object"));
    };

    if let Some(message) = frame.get("message").filter(|m| !m.is_null()) {
        let message = match message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return Ok(GatewayEnvelope::ErrorNotice { message });
    }

    let raw_op = frame
        .get("op")
        .ok_or_else(|| GatewayError::protocol("frame is missing required field \"op\""))?
        .as_u64()
        .ok_or_else(|| GatewayError::protocol("\"op\" is not an unsigned integer"))?;
    let op = OpCode::from_u64(raw_op)
        .ok_or_else(|| GatewayError::protocol(format!("unknown op code {raw_op}")))?;

    match op {
        OpCode::Dispatch => decode_dispatch(&mut frame).map(GatewayEnvelope::Dispatch),
        OpCode::Hello => {
            let body = frame
                .remove("d")
                .filter(|d| !d.is_null())
                .ok_or_else(|| GatewayError::protocol("Hello is missing required field \"d\""))?;
            Ok(GatewayEnvelope::Hello(serde_json::from_value(body)?))
        }
        OpCode::InvalidSession => {
            let resumable = frame.get("d").and_then(Value::as_bool).unwrap_or(false);
            Ok(GatewayEnvelope::InvalidSession { resumable })
        }
        other => Ok(GatewayEnvelope::Control { op: other }),
    }
}

fn decode_dispatch(frame: &mut Map<String, Value>) -> GatewayResult<DispatchEvent> {
    let event_type = match frame.remove("t") {
        Some(Value::String(t)) => t,
        Some(_) => return Err(GatewayError::protocol("\"t\" is not a string")),
        None => {
            return Err(GatewayError::protocol(
                "dispatch is missing required field \"t\"",
            ))
        }
    };
    let sequence = frame
        .get("s")
        .ok_or_else(|| GatewayError::protocol("dispatch is missing required field \"s\""))?
        .as_u64()
        .ok_or_else(|| GatewayError::protocol("\"s\" is not an unsigned integer"))?;

    let body = frame.remove("d").unwrap_or(Value::Null);
    let kind = GatewayEventType::from_str(&event_type);

    let payload = match kind {
        Some(kind) => DispatchPayload::decode(kind, body).map_err(|err| {
            GatewayError::protocol(format!("invalid {event_type} body: {err}"))
        })?,
        None => {
            tracing::warn!(event_type = %event_type, sequence, "Unknown dispatch event type");
            match body {
                Value::Object(map) => DispatchPayload::Unknown(map),
                Value::Null => DispatchPayload::Unknown(Map::new()),
                other => {
                    let mut map = Map::new();
                    map.insert("d".to_string(), other);
                    DispatchPayload::Unknown(map)
                }
            }
        }
    };

    Ok(DispatchEvent {
        sequence,
        event_type,
        kind,
        payload,
    })
}
