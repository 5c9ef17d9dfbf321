//! Heartbeat keepalive
//!
//! Once the server announces an interval, a heartbeat carrying the last
//! received sequence must reach it every interval or the socket is dropped.
//! Beats are charged to the shared [`RateLimiter`] and retried until admitted
//! rather than skipped.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::GatewayResult;
use crate::ratelimit::RateLimiter;

/// Where heartbeat frames go
#[async_trait]
pub trait HeartbeatSink: Send + Sync + 'static {
    /// Write one heartbeat carrying `sequence`
    async fn send_heartbeat(&self, sequence: i64) -> GatewayResult<()>;
}

/// Spawns heartbeat tasks on a runtime
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    runtime: Handle,
}

impl HeartbeatScheduler {
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Start beating every `interval`, first beat immediately
    ///
    /// `sequence` is read at send time, so the beat always carries the latest
    /// sequence the session has applied.
    pub fn start(
        &self,
        interval: Duration,
        limiter: Arc<RateLimiter>,
        sequence: Arc<AtomicI64>,
        sink: Arc<dyn HeartbeatSink>,
    ) -> HeartbeatHandle {
        // tokio rejects a zero period
        let interval = interval.max(Duration::from_millis(1));
        let state = Arc::new(BeatState::default());
        state.running.store(true, Ordering::SeqCst);

        let task_state = Arc::clone(&state);
        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = task_state.wake.notified() => {}
                }
                if !task_state.is_running() {
                    break;
                }

                if !charge(&limiter, &task_state).await {
                    break;
                }

                let seq = sequence.load(Ordering::SeqCst);
                match sink.send_heartbeat(seq).await {
                    Ok(()) => {
                        task_state.last_sequence_sent.store(seq, Ordering::SeqCst);
                        task_state.beats_sent.fetch_add(1, Ordering::SeqCst);
                        tracing::trace!(sequence = seq, "Heartbeat sent");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Heartbeat send failed, stopping heartbeat");
                        break;
                    }
                }
            }

            task_state.running.store(false, Ordering::SeqCst);
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Heartbeat started");

        HeartbeatHandle {
            interval,
            state,
            task,
        }
    }
}

/// Retry the limiter until a charge is admitted; `false` if cancelled meanwhile
async fn charge(limiter: &RateLimiter, state: &BeatState) -> bool {
    loop {
        let wait = limiter.try_mark();
        if wait.is_zero() {
            return true;
        }
        if !state.is_running() {
            return false;
        }
        tokio::task::yield_now().await;
    }
}

#[derive(Debug)]
struct BeatState {
    running: AtomicBool,
    last_sequence_sent: AtomicI64,
    beats_sent: AtomicU64,
    acks_received: AtomicU64,
    wake: Notify,
}

impl Default for BeatState {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            last_sequence_sent: AtomicI64::new(-1),
            beats_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }
}

impl BeatState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Handle to a running heartbeat; dropping it cancels the beat
#[derive(Debug)]
pub struct HeartbeatHandle {
    interval: Duration,
    state: Arc<BeatState>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sequence carried by the last successful beat, -1 before the first
    #[must_use]
    pub fn last_sequence_sent(&self) -> i64 {
        self.state.last_sequence_sent.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn beats_sent(&self) -> u64 {
        self.state.beats_sent.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn acks_received(&self) -> u64 {
        self.state.acks_received.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running() && !self.task.is_finished()
    }

    /// Note a HeartbeatAck from the server
    pub fn record_ack(&self) {
        self.state.acks_received.fetch_add(1, Ordering::SeqCst);
    }

    /// Send a beat now, outside the regular schedule
    pub fn beat_now(&self) {
        self.state.wake.notify_one();
    }

    /// Stop beating; idempotent
    pub fn cancel(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            tracing::debug!(beats_sent = self.beats_sent(), "Heartbeat cancelled");
        }
        self.task.abort();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
