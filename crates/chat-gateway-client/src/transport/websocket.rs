//! WebSocket transport over `tokio-tungstenite`

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Connector, FrameWriter, TransportConnection, TransportEvent};
use crate::error::{GatewayError, GatewayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens gateway sockets with `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WsConnector {
    event_buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

impl WsConnector {
    /// `event_buffer` bounds the reader-to-session channel
    #[must_use]
    pub fn new(event_buffer: usize) -> Self {
        Self {
            event_buffer: event_buffer.max(1),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, runtime: &Handle) -> GatewayResult<TransportConnection> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::transport(format!("failed to connect to {url}: {e}")))?;

        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");

        let (write, read) = stream.split();
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let reader = runtime.spawn(reader_task(read, tx));

        Ok(TransportConnection {
            writer: Box::new(WsWriter {
                sink: write,
                reader,
                closed: false,
            }),
            events: rx,
        })
    }
}

async fn reader_task(mut read: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.to_string())
                });
                let _ = tx.send(TransportEvent::Closed { code, reason }).await;
                break;
            }
            Some(Ok(Message::Binary(bytes))) => {
                tracing::warn!(len = bytes.len(), "Ignoring binary frame, compression is not negotiated");
                continue;
            }
            // Ping/Pong are answered by tungstenite itself
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                let _ = tx
                    .send(TransportEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                    .await;
                break;
            }
        };

        if tx.send(event).await.is_err() {
            // Session dropped the connection
            break;
        }
    }
}

/// Write half of a WebSocket; owns the reader task and stops it on close
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, text: String) -> GatewayResult<()> {
        if self.closed {
            return Err(GatewayError::NotConnected);
        }
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::transport(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> GatewayResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.reader.abort();
        let frame = CloseFrame {
            code: WsCloseCode::Normal,
            reason: "client closing".into(),
        };
        let result = self
            .sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| GatewayError::transport(format!("close failed: {e}")));
        let _ = self.sink.close().await;
        result
    }
}

impl Drop for WsWriter {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
