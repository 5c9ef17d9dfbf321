//! # chat-gateway-client
//!
//! Client for the chat platform's real-time gateway: a sequenced,
//! authenticated WebSocket session that receives server-pushed events and
//! sends a small set of control frames.

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod ratelimit;
pub mod transport;

pub use broadcast::{EventDispatcher, EventDispatcherConfig, EventSink, SinkId};
pub use connection::{ConnectionState, GatewaySession, GatewaySessionBuilder, Trigger};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, DispatchPayload, GatewayEventType, Snowflake, UserPayload};
pub use heartbeat::{HeartbeatHandle, HeartbeatScheduler, HeartbeatSink};
pub use protocol::{CloseCode, GatewayEnvelope, OpCode, OutboundFrame};
pub use ratelimit::RateLimiter;
pub use transport::{
    Connector, FrameWriter, GatewayUrlResolver, HttpGatewayResolver, StaticGatewayResolver,
    TransportConnection, TransportEvent, WsConnector,
};
