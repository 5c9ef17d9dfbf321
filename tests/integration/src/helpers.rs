//! Test helpers for integration tests
//!
//! Provides an in-process gateway, a REST stub for the URL lookup, and
//! utilities for building sessions against them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chat_common::ClientConfig;
use chat_gateway_client::{ConnectionState, DispatchEvent, GatewaySession};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How long any single wait in a test may take
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process gateway accepting WebSocket connections on a random port
pub struct MockGateway {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<GatewayConnection>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                match tokio_tungstenite::accept_async(tcp).await {
                    Ok(ws) => {
                        if tx.send(GatewayConnection { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("mock gateway handshake failed: {e}"),
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            _handle: handle,
        })
    }

    /// WebSocket URL of this gateway
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Result<GatewayConnection> {
        tokio::time::timeout(TEST_TIMEOUT, self.connections.recv())
            .await
            .context("timed out waiting for a client connection")?
            .ok_or_else(|| anyhow!("mock gateway stopped accepting"))
    }

    /// Assert no client connects within `within`
    pub async fn expect_no_connection(&mut self, within: Duration) -> Result<()> {
        match tokio::time::timeout(within, self.connections.recv()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(_)) => bail!("unexpected client connection"),
        }
    }
}

/// Server side of one client socket
pub struct GatewayConnection {
    ws: WebSocketStream<TcpStream>,
}

impl GatewayConnection {
    /// Next JSON frame from the client
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            let msg = tokio::time::timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for a client frame")?
                .ok_or_else(|| anyhow!("client closed the socket"))??;

            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => bail!("client closed the socket: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Next frame with op `op`, skipping heartbeats unless a heartbeat is wanted
    pub async fn expect_op(&mut self, op: u64) -> Result<Value> {
        loop {
            let frame = self.recv_json().await?;
            match frame["op"].as_u64() {
                Some(got) if got == op => return Ok(frame),
                Some(1) => continue,
                _ => bail!("expected op {op}, got {frame}"),
            }
        }
    }

    pub async fn send_json(&mut self, frame: &Value) -> Result<()> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Close the socket with a gateway close code
    pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<()> {
        self.ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            })))
            .await?;
        Ok(())
    }
}

/// Stub for `GET /gateway` answering every request with a fixed response
pub struct MockRestApi {
    pub addr: SocketAddr,
    authorizations: mpsc::UnboundedReceiver<String>,
    _handle: JoinHandle<()>,
}

impl MockRestApi {
    /// Answer with `{"url": gateway_url}`
    pub async fn start(gateway_url: &str) -> Result<Self> {
        let body = serde_json::json!({ "url": gateway_url }).to_string();
        Self::start_with("200 OK", body).await
    }

    pub async fn start_with(status: &'static str, body: String) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, authorizations) = mpsc::unbounded_channel();
        let body = Arc::new(body);

        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                let body = Arc::clone(&body);
                tokio::spawn(async move {
                    if let Err(e) = respond(socket, status, &body, &tx).await {
                        eprintln!("mock REST API failed: {e}");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            authorizations,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Authorization header of the next lookup request
    pub async fn next_authorization(&mut self) -> Result<String> {
        tokio::time::timeout(TEST_TIMEOUT, self.authorizations.recv())
            .await
            .context("timed out waiting for a gateway lookup")?
            .ok_or_else(|| anyhow!("mock REST API stopped"))
    }
}

async fn respond(
    mut socket: TcpStream,
    status: &str,
    body: &str,
    authorizations: &mpsc::UnboundedSender<String>,
) -> Result<()> {
    let mut buf = vec![0u8; 8192];
    let n = socket.read(&mut buf).await?;
    let head = String::from_utf8_lossy(&buf[..n]);

    let authorization = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("authorization")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    let _ = authorizations.send(authorization);

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}

/// Configuration suitable for tests: fixed gateway URL and short backoff
pub fn test_config(gateway_url: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api.gateway_url = Some(gateway_url.to_string());
    config.reconnect.invalid_session_backoff_min_ms = 50;
    config.reconnect.invalid_session_backoff_max_ms = 150;
    config
}

/// Session on the current runtime whose dispatches are forwarded to the returned receiver
pub fn session_with_dispatches(
    config: ClientConfig,
) -> Result<(GatewaySession, mpsc::UnboundedReceiver<DispatchEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = GatewaySession::builder(config)
        .sink(move |event: &DispatchEvent| {
            tx.send(event.clone())?;
            Ok(())
        })
        .build()?;
    Ok((session, rx))
}

/// Wait until the session reaches `state`
pub async fn wait_for_state(
    states: &mut watch::Receiver<ConnectionState>,
    state: ConnectionState,
) -> Result<()> {
    tokio::time::timeout(TEST_TIMEOUT, states.wait_for(|s| *s == state))
        .await
        .with_context(|| format!("timed out waiting for {state}"))??;
    Ok(())
}

/// Next dispatch delivered to a sink
pub async fn next_dispatch(rx: &mut mpsc::UnboundedReceiver<DispatchEvent>) -> Result<DispatchEvent> {
    tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .context("timed out waiting for a dispatch")?
        .ok_or_else(|| anyhow!("dispatch channel closed"))
}
