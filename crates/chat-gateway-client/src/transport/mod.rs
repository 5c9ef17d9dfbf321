//! Socket transport
//!
//! The session only sees these traits; [`WsConnector`] is the WebSocket
//! implementation and [`GatewayUrlResolver`] finds where to connect.

mod resolver;
mod websocket;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::GatewayResult;

pub use resolver::{
    resolver_from_config, GatewayUrlResolver, HttpGatewayResolver, StaticGatewayResolver,
};
pub use websocket::{WsConnector, WsWriter};

/// What the socket reader reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame
    Message(String),
    /// The socket closed; `code` is absent when no close frame arrived
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Write half of an open socket
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn send(&mut self, text: String) -> GatewayResult<()>;

    /// Close the socket; further sends fail
    async fn close(&mut self) -> GatewayResult<()>;
}

/// An open socket: a writer plus the stream of reader events
pub struct TransportConnection {
    pub writer: Box<dyn FrameWriter>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// Opens sockets
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url`; background reader work is spawned on `runtime`
    async fn connect(&self, url: &str, runtime: &Handle) -> GatewayResult<TransportConnection>;
}
