//! Connection task
//!
//! One task per connection attempt: URL lookup, socket open, handshake, then
//! the inbound loop. Everything it reports back goes through
//! [`SessionInner::fire_if_current`] so a superseded attempt cannot touch the
//! session.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use chat_common::GatewayConfig;

use super::identity::SessionIdentity;
use super::session::SessionInner;
use super::state::Trigger;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{DispatchEvent, DispatchPayload};
use crate::heartbeat::HeartbeatSink;
use crate::protocol::{
    decode, CloseCode, GatewayEnvelope, IdentifyPayload, OpCode, OutboundFrame, ResumePayload,
};
use crate::transport::{TransportConnection, TransportEvent};

/// Drive one connection attempt for `generation` until the socket goes away
pub(super) async fn run_connection(inner: Arc<SessionInner>, generation: u64) {
    let Some(token) = inner.token() else {
        tracing::warn!(generation, "No token stored, abandoning connect");
        inner.fire_if_current(generation, Trigger::ConnectFail);
        return;
    };

    let url = match inner.resolver.resolve(&token).await {
        Ok(url) => url,
        Err(err) => {
            connect_failed(&inner, generation, err);
            return;
        }
    };

    tracing::info!(url = %url, generation, "Connecting to gateway");
    let TransportConnection { writer, mut events } =
        match inner.connector.connect(&url, &inner.runtime).await {
            Ok(connection) => connection,
            Err(err) => {
                connect_failed(&inner, generation, err);
                return;
            }
        };

    if !inner.install_writer(generation, writer).await {
        return;
    }
    if !inner.fire_if_current(generation, Trigger::ConnectOk) {
        return;
    }

    let handshake = handshake_frame(&inner.identity, &inner.config.gateway, token);
    inner.limiter.acquire().await;
    if let Err(err) = inner.write_handshake(generation, &handshake).await {
        tracing::warn!(error = %err, "Failed to send handshake");
        inner.fire_if_current(generation, Trigger::Disconnect);
        return;
    }
    tracing::info!(op = %handshake.op(), generation, "Handshake sent");

    let mut inbound = Inbound {
        inner: &inner,
        generation,
        saw_hello: false,
    };

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => {
                if inbound.handle_text(&text).await.is_break() {
                    return;
                }
            }
            TransportEvent::Closed { code, reason } => {
                socket_closed(&inner, generation, code, &reason);
                return;
            }
            TransportEvent::Error(err) => {
                tracing::warn!(error = %err, generation, "Gateway socket error");
                inner.fire_if_current(generation, Trigger::Disconnect);
                return;
            }
        }
    }

    tracing::debug!(generation, "Transport event stream ended");
    inner.fire_if_current(generation, Trigger::Disconnect);
}

/// Identify when there is no session to resume, Resume otherwise
pub(super) fn handshake_frame(
    identity: &SessionIdentity,
    gateway: &GatewayConfig,
    token: String,
) -> OutboundFrame {
    match identity.session_id() {
        Some(session_id) => OutboundFrame::Resume(ResumePayload {
            token,
            session_id,
            seq: identity.last_sequence(),
        }),
        None => OutboundFrame::Identify(IdentifyPayload {
            token,
            v: gateway.protocol_version,
            large_threshold: gateway.large_threshold,
            compress: gateway.compress,
            properties: (&gateway.properties).into(),
        }),
    }
}

fn connect_failed(inner: &Arc<SessionInner>, generation: u64, err: GatewayError) {
    tracing::warn!(error = %err, generation, "Gateway connect failed");
    if err.is_fatal() {
        inner.record_fatal(err);
    }
    inner.fire_if_current(generation, Trigger::ConnectFail);
}

fn socket_closed(inner: &Arc<SessionInner>, generation: u64, code: Option<u16>, reason: &str) {
    match code.and_then(CloseCode::from_u16) {
        Some(close) if close.is_authentication_failure() => {
            tracing::error!(code = %close, reason = %reason, "Gateway rejected the token");
            inner.record_fatal(GatewayError::Authentication(format!(
                "gateway closed the connection: {close}"
            )));
        }
        Some(close) => {
            tracing::warn!(code = %close, reason = %reason, "Gateway closed the connection");
        }
        None => {
            tracing::info!(code = ?code, reason = %reason, "Gateway connection closed");
        }
    }
    inner.fire_if_current(generation, Trigger::Disconnect);
}

/// Inbound frame handling for one connection
struct Inbound<'a> {
    inner: &'a Arc<SessionInner>,
    generation: u64,
    /// Decode failures before Hello abort the handshake
    saw_hello: bool,
}

impl Inbound<'_> {
    async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(err) if self.saw_hello => {
                tracing::warn!(error = %err, "Dropping undecodable gateway frame");
                return ControlFlow::Continue(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "Undecodable frame during handshake, disconnecting");
                self.inner.fire_if_current(self.generation, Trigger::Disconnect);
                return ControlFlow::Break(());
            }
        };

        match envelope {
            GatewayEnvelope::ErrorNotice { message } => {
                tracing::warn!(message = %message, "Gateway error notice");
            }
            GatewayEnvelope::Dispatch(event) => self.handle_dispatch(event),
            GatewayEnvelope::Hello(hello) => {
                self.saw_hello = true;
                tracing::debug!(heartbeat_interval = hello.heartbeat_interval, "Hello received");
                self.inner.start_heartbeat(
                    self.generation,
                    Duration::from_millis(hello.heartbeat_interval),
                );
            }
            GatewayEnvelope::InvalidSession { resumable } => {
                let backoff = self.inner.invalid_session_backoff();
                tracing::warn!(
                    error = %GatewayError::SessionInvalidated,
                    resumable,
                    backoff_ms = backoff.as_millis() as u64,
                    "Identifying again after backoff"
                );
                self.inner.identity.invalidate();
                self.inner.schedule_reconnect(self.generation, Some(backoff));
                return ControlFlow::Break(());
            }
            GatewayEnvelope::Control { op: OpCode::Reconnect } => {
                tracing::info!("Gateway requested reconnect");
                self.inner.schedule_reconnect(self.generation, None);
                return ControlFlow::Break(());
            }
            GatewayEnvelope::Control { op: OpCode::Heartbeat } => self.heartbeat_requested().await,
            GatewayEnvelope::Control { op: OpCode::HeartbeatAck } => {
                self.inner.record_heartbeat_ack();
            }
            GatewayEnvelope::Control { op } => {
                tracing::debug!(op = %op, "Ignoring control frame");
            }
        }

        ControlFlow::Continue(())
    }

    fn handle_dispatch(&self, event: DispatchEvent) {
        self.inner.identity.apply_sequence(event.sequence);

        match &event.payload {
            DispatchPayload::Ready(ready) => {
                self.inner.identity.set_session_id(ready.session_id.clone());
                *self.inner.current_user.write() = Some(ready.user.clone());
                tracing::info!(
                    session_id = %ready.session_id,
                    user_id = %ready.user.id,
                    guilds = ready.guilds.len(),
                    "Gateway session ready"
                );

                if let Some(interval) = ready.heartbeat_interval {
                    if !self.inner.has_heartbeat() {
                        self.inner
                            .start_heartbeat(self.generation, Duration::from_millis(interval));
                    }
                }
                self.inner.finish_loading(self.generation);
            }
            DispatchPayload::Resumed(_) => {
                tracing::info!(sequence = event.sequence, "Gateway session resumed");
                self.inner.finish_loading(self.generation);
            }
            _ => {}
        }

        tracing::trace!(event_type = %event.event_type, sequence = event.sequence, "Dispatch received");
        self.inner.dispatcher.publish(event);
    }

    /// Server asked for a beat; use the running heartbeat if there is one
    async fn heartbeat_requested(&self) {
        if self.inner.beat_now() {
            return;
        }

        self.inner.limiter.acquire().await;
        let frame = OutboundFrame::Heartbeat(self.inner.identity.last_sequence());
        if let Err(err) = self.inner.write_frame(self.generation, &frame).await {
            tracing::warn!(error = %err, "Failed to answer heartbeat request");
        }
    }
}

/// Heartbeat writes bound to the connection that started them
pub(super) struct SessionHeartbeat {
    inner: Weak<SessionInner>,
    generation: u64,
}

impl SessionHeartbeat {
    pub(super) fn new(inner: Weak<SessionInner>, generation: u64) -> Self {
        Self { inner, generation }
    }
}

#[async_trait]
impl HeartbeatSink for SessionHeartbeat {
    async fn send_heartbeat(&self, sequence: i64) -> GatewayResult<()> {
        let inner = self.inner.upgrade().ok_or(GatewayError::NotConnected)?;
        inner
            .write_frame(self.generation, &OutboundFrame::Heartbeat(sequence))
            .await
    }
}
