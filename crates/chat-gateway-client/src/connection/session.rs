//! Gateway session
//!
//! Owns one logical gateway session across socket reconnects. Every trigger
//! goes through a single lifecycle lock; entry actions spawn or tear down the
//! background work and never await while holding it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use chat_common::ClientConfig;

use super::handler::{self, SessionHeartbeat};
use super::identity::SessionIdentity;
use super::state::{ConnectionState, StateMachine, Transition, Trigger};
use crate::broadcast::{EventDispatcher, EventDispatcherConfig, EventSink, SinkId};
use crate::error::{GatewayError, GatewayResult};
use crate::events::UserPayload;
use crate::heartbeat::{HeartbeatHandle, HeartbeatScheduler};
use crate::protocol::OutboundFrame;
use crate::ratelimit::RateLimiter;
use crate::transport::{
    resolver_from_config, Connector, FrameWriter, GatewayUrlResolver, WsConnector,
};

/// Client side of one gateway session
///
/// ```no_run
/// # async fn demo() -> chat_gateway_client::GatewayResult<()> {
/// use chat_common::ClientConfig;
/// use chat_gateway_client::GatewaySession;
///
/// let session = GatewaySession::builder(ClientConfig::default())
///     .sink(|event: &chat_gateway_client::DispatchEvent| {
///         println!("{event}");
///         Ok(())
///     })
///     .build()?;
/// session.open("token")?;
/// # Ok(())
/// # }
/// ```
pub struct GatewaySession {
    inner: Arc<SessionInner>,
}

impl GatewaySession {
    pub fn builder(config: ClientConfig) -> GatewaySessionBuilder {
        GatewaySessionBuilder::new(config)
    }

    /// Start connecting with `token`
    ///
    /// Returns immediately; progress is reported through [`subscribe_state`](Self::subscribe_state).
    /// Calling it while a connection exists does nothing.
    pub fn open(&self, token: &str) -> GatewayResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(GatewayError::Configuration("token must not be blank".to_string()));
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.machine.state() != ConnectionState::Disconnected {
            tracing::debug!(state = %lifecycle.machine.state(), "Session already open");
            return Ok(());
        }

        *self.inner.token.write() = Some(token.to_string());
        *self.inner.last_error.write() = None;
        self.inner.fire_locked(&mut lifecycle, Trigger::Connect);
        Ok(())
    }

    /// Close the session from any state
    ///
    /// The heartbeat is stopped before this returns; the socket is closed in
    /// the background.
    pub fn close(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if let Some(reconnect) = lifecycle.reconnect.take() {
            reconnect.abort();
        }

        match lifecycle.machine.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => self.inner.fire_locked(&mut lifecycle, Trigger::ConnectFail),
            _ => self.inner.fire_locked(&mut lifecycle, Trigger::Disconnect),
        }
    }

    /// Send a frame on the open socket
    ///
    /// Charged to the shared rate limiter. Heartbeats wait for a charge
    /// instead of failing. Fails with `NotConnected` until Identify or Resume
    /// has gone out on the current socket.
    pub async fn send(&self, frame: OutboundFrame) -> GatewayResult<()> {
        let generation = {
            let lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.machine.state().is_in(ConnectionState::Connected) {
                return Err(GatewayError::NotConnected);
            }
            lifecycle.generation
        };
        if self.inner.handshake_generation.load(Ordering::Acquire) != generation {
            tracing::debug!(generation, "Handshake not sent yet, refusing send");
            return Err(GatewayError::NotConnected);
        }

        if matches!(frame, OutboundFrame::Heartbeat(_)) {
            self.inner.limiter.acquire().await;
        } else {
            self.inner.limiter.mark()?;
        }

        self.inner.write_frame(generation, &frame).await
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Connected, loading or ready
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_in(ConnectionState::Connected)
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn session_id(&self) -> GatewayResult<String> {
        if !self.is_ready() {
            return Err(GatewayError::NotReady);
        }
        self.inner.identity.session_id().ok_or(GatewayError::NotReady)
    }

    /// The account this session is logged in as, from READY
    pub fn current_user(&self) -> GatewayResult<UserPayload> {
        if !self.is_ready() {
            return Err(GatewayError::NotReady);
        }
        self.inner.current_user.read().clone().ok_or(GatewayError::NotReady)
    }

    pub fn last_sequence(&self) -> GatewayResult<i64> {
        if !self.is_ready() {
            return Err(GatewayError::NotReady);
        }
        Ok(self.inner.identity.last_sequence())
    }

    /// Most recent fatal error, cleared by the next `open`
    #[must_use]
    pub fn last_error(&self) -> Option<GatewayError> {
        self.inner.last_error.read().clone()
    }

    pub fn subscribe(&self, sink: impl EventSink) -> SinkId {
        self.inner.dispatcher.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.inner.dispatcher.unsubscribe(id)
    }

    /// Limiter shared by application sends and heartbeats
    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.inner.limiter)
    }

    /// Seed a session id and sequence so the next `open` resumes instead of identifying
    pub fn restore(&self, session_id: impl Into<String>, last_sequence: i64) {
        self.inner.identity.restore(session_id, last_sequence);
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state())
            .field("session_id", &self.inner.identity.session_id())
            .field("last_sequence", &self.inner.identity.last_sequence())
            .finish()
    }
}

/// Assembles a [`GatewaySession`] from its collaborators
///
/// Anything not given falls back to what the configuration implies: the REST
/// or fixed URL resolver, the WebSocket connector and the current runtime.
pub struct GatewaySessionBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn GatewayUrlResolver>>,
    connector: Option<Arc<dyn Connector>>,
    sinks: Vec<Arc<dyn EventSink>>,
    runtime: Option<Handle>,
}

impl GatewaySessionBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            resolver: None,
            connector: None,
            sinks: Vec::new(),
            runtime: None,
        }
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn GatewayUrlResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl EventSink) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Runtime all background work is spawned on
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> GatewayResult<GatewaySession> {
        self.config
            .validate()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                GatewayError::Configuration("no tokio runtime available".to_string())
            })?,
        };

        let resolver = self
            .resolver
            .unwrap_or_else(|| resolver_from_config(&self.config));
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(WsConnector::new(self.config.gateway.transport_buffer))
        });

        let dispatcher = EventDispatcher::new(EventDispatcherConfig {
            buffer: self.config.gateway.dispatch_buffer,
        });
        for sink in self.sinks {
            dispatcher.subscribe_shared(sink);
        }
        dispatcher.start(&runtime);

        let limiter = Arc::new(RateLimiter::from_config("gateway", &self.config.rate_limit));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = SessionInner {
            heartbeats: HeartbeatScheduler::new(runtime.clone()),
            runtime,
            config: self.config,
            resolver,
            connector,
            lifecycle: Mutex::new(Lifecycle::default()),
            writer: tokio::sync::Mutex::new(None),
            handshake_generation: AtomicU64::new(0),
            state_tx,
            token: RwLock::new(None),
            last_error: RwLock::new(None),
            current_user: RwLock::new(None),
            identity: SessionIdentity::new(),
            limiter,
            dispatcher,
        };

        Ok(GatewaySession {
            inner: Arc::new(inner),
        })
    }
}

/// Everything guarded by the lifecycle lock
#[derive(Default)]
struct Lifecycle {
    machine: StateMachine,
    /// Bumped on every Connecting and Disconnected entry
    generation: u64,
    io_task: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatHandle>,
    reconnect: Option<JoinHandle<()>>,
}

pub(super) struct SessionInner {
    pub(super) runtime: Handle,
    pub(super) config: ClientConfig,
    pub(super) resolver: Arc<dyn GatewayUrlResolver>,
    pub(super) connector: Arc<dyn Connector>,
    lifecycle: Mutex<Lifecycle>,
    /// Socket writer tagged with the generation that opened it
    writer: tokio::sync::Mutex<Option<(u64, Box<dyn FrameWriter>)>>,
    /// Generation whose Identify or Resume has been written
    handshake_generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    token: RwLock<Option<String>>,
    last_error: RwLock<Option<GatewayError>>,
    pub(super) current_user: RwLock<Option<UserPayload>>,
    pub(super) identity: SessionIdentity,
    pub(super) limiter: Arc<RateLimiter>,
    pub(super) dispatcher: EventDispatcher,
    heartbeats: HeartbeatScheduler,
}

impl SessionInner {
    fn state(&self) -> ConnectionState {
        self.lifecycle.lock().machine.state()
    }

    pub(super) fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Surface a fatal error; an authentication failure also forgets the token
    pub(super) fn record_fatal(&self, err: GatewayError) {
        if matches!(err, GatewayError::Authentication(_)) {
            *self.token.write() = None;
        }
        *self.last_error.write() = Some(err);
    }

    /// Fire `trigger` on behalf of a task started for `generation`
    ///
    /// Returns `false` without firing when the session moved on.
    pub(super) fn fire_if_current(self: &Arc<Self>, generation: u64, trigger: Trigger) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            tracing::debug!(
                %trigger,
                generation,
                current = lifecycle.generation,
                "Dropping trigger from stale connection"
            );
            return false;
        }
        self.fire_locked(&mut lifecycle, trigger);
        true
    }

    /// READY or RESUMED arrived: leave Loading
    pub(super) fn finish_loading(self: &Arc<Self>, generation: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation == generation
            && lifecycle.machine.state() == ConnectionState::Loading
        {
            self.fire_locked(&mut lifecycle, Trigger::LoadOk);
        }
    }

    fn fire_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle, trigger: Trigger) {
        match lifecycle.machine.fire(trigger) {
            Ok(Transition::Enter(state)) => {
                self.state_tx.send_replace(state);
                self.enter(lifecycle, state);
            }
            Ok(Transition::Ignore) => {}
            Err(err) => self.illegal_transition(lifecycle, err),
        }
    }

    fn enter(self: &Arc<Self>, lifecycle: &mut Lifecycle, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {
                lifecycle.generation += 1;
                let task = self
                    .runtime
                    .spawn(handler::run_connection(Arc::clone(self), lifecycle.generation));
                lifecycle.io_task = Some(task);
            }
            ConnectionState::Connected => self.fire_locked(lifecycle, Trigger::Load),
            ConnectionState::Disconnected => self.tear_down(lifecycle),
            ConnectionState::Loading | ConnectionState::Ready => {}
        }
    }

    fn tear_down(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        lifecycle.generation += 1;
        if let Some(task) = lifecycle.io_task.take() {
            task.abort();
        }
        if let Some(heartbeat) = lifecycle.heartbeat.take() {
            heartbeat.cancel();
        }

        let inner = Arc::clone(self);
        let generation = lifecycle.generation;
        self.runtime.spawn(async move {
            inner.close_writer(generation).await;
        });

        tracing::info!(generation, "Gateway session disconnected");
    }

    fn illegal_transition(self: &Arc<Self>, lifecycle: &mut Lifecycle, err: GatewayError) {
        tracing::error!(error = %err, "Illegal gateway state transition, disconnecting");
        *self.last_error.write() = Some(err.clone());

        match lifecycle.machine.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => self.fire_locked(lifecycle, Trigger::ConnectFail),
            _ => self.fire_locked(lifecycle, Trigger::Disconnect),
        }

        if self.config.app.env.is_development() {
            panic!("{err}");
        }
    }

    /// Install the writer for `generation`; a stale writer is closed instead
    pub(super) async fn install_writer(
        &self,
        generation: u64,
        mut writer: Box<dyn FrameWriter>,
    ) -> bool {
        let mut slot = self.writer.lock().await;
        let current = self.lifecycle.lock().generation;
        if current != generation {
            drop(slot);
            let _ = writer.close().await;
            return false;
        }

        if let Some((_, mut previous)) = slot.replace((generation, writer)) {
            let _ = previous.close().await;
        }
        true
    }

    async fn close_writer(&self, before_generation: u64) {
        let mut slot = self.writer.lock().await;
        if slot.as_ref().is_some_and(|(generation, _)| *generation < before_generation) {
            if let Some((_, mut writer)) = slot.take() {
                if let Err(err) = writer.close().await {
                    tracing::debug!(error = %err, "Socket close failed");
                }
            }
        }
    }

    /// Write `frame` on the writer opened by `generation`
    pub(super) async fn write_frame(
        &self,
        generation: u64,
        frame: &OutboundFrame,
    ) -> GatewayResult<()> {
        let text = frame.encode()?;
        let mut slot = self.writer.lock().await;
        match slot.as_mut() {
            Some((owner, writer)) if *owner == generation => {
                writer.send(text).await?;
                tracing::trace!(op = %frame.op(), "Frame sent");
                Ok(())
            }
            _ => Err(GatewayError::NotConnected),
        }
    }

    /// Write the Identify or Resume for `generation`
    ///
    /// Application sends are admitted from here on; they queue behind this
    /// write on the writer lock.
    pub(super) async fn write_handshake(
        &self,
        generation: u64,
        frame: &OutboundFrame,
    ) -> GatewayResult<()> {
        let text = frame.encode()?;
        let mut slot = self.writer.lock().await;
        match slot.as_mut() {
            Some((owner, writer)) if *owner == generation => {
                self.handshake_generation.store(generation, Ordering::Release);
                writer.send(text).await
            }
            _ => Err(GatewayError::NotConnected),
        }
    }

    /// (Re)start the heartbeat for `generation`
    pub(super) fn start_heartbeat(self: &Arc<Self>, generation: u64, interval: Duration) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return;
        }
        if let Some(previous) = lifecycle.heartbeat.take() {
            previous.cancel();
        }

        let sink = Arc::new(SessionHeartbeat::new(Arc::downgrade(self), generation));
        lifecycle.heartbeat = Some(self.heartbeats.start(
            interval,
            Arc::clone(&self.limiter),
            self.identity.sequence_cell(),
            sink,
        ));
    }

    pub(super) fn has_heartbeat(&self) -> bool {
        self.lifecycle
            .lock()
            .heartbeat
            .as_ref()
            .is_some_and(HeartbeatHandle::is_running)
    }

    /// Ask the running heartbeat for an immediate beat; `false` if none runs
    pub(super) fn beat_now(&self) -> bool {
        match self.lifecycle.lock().heartbeat.as_ref() {
            Some(heartbeat) if heartbeat.is_running() => {
                heartbeat.beat_now();
                true
            }
            _ => false,
        }
    }

    pub(super) fn record_heartbeat_ack(&self) {
        if let Some(heartbeat) = self.lifecycle.lock().heartbeat.as_ref() {
            heartbeat.record_ack();
        }
    }

    /// Drop the connection for `generation` and connect again after `delay`
    pub(super) fn schedule_reconnect(self: &Arc<Self>, generation: u64, delay: Option<Duration>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return;
        }
        self.fire_locked(&mut lifecycle, Trigger::Disconnect);

        let inner = Arc::clone(self);
        let disconnected = lifecycle.generation;
        let task = self.runtime.spawn(async move {
            if let Some(delay) = delay {
                tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
                tokio::time::sleep(delay).await;
            }

            let mut lifecycle = inner.lifecycle.lock();
            if lifecycle.generation != disconnected
                || lifecycle.machine.state() != ConnectionState::Disconnected
            {
                tracing::debug!("Session changed during reconnect, skipping");
                return;
            }
            lifecycle.reconnect = None;
            inner.fire_locked(&mut lifecycle, Trigger::Connect);
        });

        if let Some(previous) = lifecycle.reconnect.replace(task) {
            previous.abort();
        }
    }

    /// Random wait before re-identifying after an invalid session
    pub(super) fn invalid_session_backoff(&self) -> Duration {
        let reconnect = &self.config.reconnect;
        let min = reconnect.invalid_session_backoff_min_ms;
        let max = reconnect.invalid_session_backoff_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}
