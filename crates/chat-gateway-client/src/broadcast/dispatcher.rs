//! Event dispatcher
//!
//! Decouples the connection task from subscriber code: decoded dispatches go
//! into a bounded channel and a worker task hands each one to every sink.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::events::DispatchEvent;

/// Receives decoded dispatches
///
/// Errors and panics are logged per sink and never reach other sinks.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: &DispatchEvent) -> anyhow::Result<()>;
}

impl<F> EventSink for F
where
    F: Fn(&DispatchEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn publish(&self, event: &DispatchEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Identifies a registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Configuration for the event dispatcher
#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    /// Dispatches queued before new ones are dropped
    pub buffer: usize,
}

impl Default for EventDispatcherConfig {
    fn default() -> Self {
        Self { buffer: 1024 }
    }
}

type SinkList = RwLock<Vec<(SinkId, Arc<dyn EventSink>)>>;

/// Fans decoded dispatches out to registered sinks
pub struct EventDispatcher {
    tx: mpsc::Sender<DispatchEvent>,
    rx: Mutex<Option<mpsc::Receiver<DispatchEvent>>>,
    sinks: Arc<SinkList>,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(config: EventDispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            sinks: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(false)),
            dropped: AtomicU64::new(0),
            worker: Mutex::new(None),
        }
    }

    /// Register a sink
    pub fn subscribe(&self, sink: impl EventSink) -> SinkId {
        self.subscribe_shared(Arc::new(sink))
    }

    /// Register a sink that is already shared
    pub fn subscribe_shared(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sinks.write().push((id, sink));
        tracing::debug!(sink_id = id.0, "Event sink registered");
        id
    }

    /// Remove a sink; `false` if it was not registered
    pub fn unsubscribe(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Spawn the delivery worker; a second call is a no-op
    pub fn start(&self, runtime: &Handle) {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("Event dispatcher is already running");
            return;
        };
        self.running.store(true, Ordering::SeqCst);

        let sinks = Arc::clone(&self.sinks);
        let running = Arc::clone(&self.running);
        let worker = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&sinks, &event);
            }
            running.store(false, Ordering::SeqCst);
            tracing::debug!("Event dispatcher loop ended");
        });

        *self.worker.lock() = Some(worker);
        tracing::debug!("Event dispatcher started");
    }

    /// Queue a dispatch without waiting; `false` if it was dropped
    pub fn publish(&self, event: DispatchEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    event_type = %event.event_type,
                    sequence = event.sequence,
                    dropped,
                    "Dispatch queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Dispatch queue closed, dropping event");
                false
            }
        }
    }

    /// Dispatches dropped because the queue was full
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker; queued dispatches are discarded
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
            tracing::debug!("Event dispatcher stopped");
        }
    }
}

fn deliver(sinks: &SinkList, event: &DispatchEvent) {
    // Snapshot so sinks may (un)subscribe from inside publish
    let snapshot: Vec<_> = sinks.read().clone();

    for (id, sink) in snapshot {
        match panic::catch_unwind(AssertUnwindSafe(|| sink.publish(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(sink_id = id.0, event_type = %event.event_type, error = %err, "Event sink failed");
            }
            Err(_) => {
                tracing::error!(sink_id = id.0, event_type = %event.event_type, "Event sink panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sink_count())
            .field("running", &self.is_running())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DispatchPayload;
    use serde_json::Map;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    fn event(sequence: u64) -> DispatchEvent {
        DispatchEvent {
            sequence,
            event_type: "SOME_FUTURE_EVENT".to_string(),
            kind: None,
            payload: DispatchPayload::Unknown(Map::new()),
        }
    }

    fn forwarding_sink(tx: UnboundedSender<u64>) -> impl EventSink {
        move |event: &DispatchEvent| {
            tx.send(event.sequence)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let dispatcher = EventDispatcher::new(EventDispatcherConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(forwarding_sink(tx));
        dispatcher.start(&Handle::current());

        for seq in 1..=3 {
            assert!(dispatcher.publish(event(seq)));
        }
        for seq in 1..=3 {
            assert_eq!(rx.recv().await, Some(seq));
        }
    }

    #[tokio::test]
    async fn test_failing_and_panicking_sinks_are_isolated() {
        let dispatcher = EventDispatcher::new(EventDispatcherConfig::default());
        dispatcher.subscribe(|_: &DispatchEvent| -> anyhow::Result<()> {
            anyhow::bail!("sink is broken")
        });
        dispatcher.subscribe(|_: &DispatchEvent| -> anyhow::Result<()> { panic!("sink exploded") });
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(forwarding_sink(tx));
        dispatcher.start(&Handle::current());

        dispatcher.publish(event(1));
        dispatcher.publish(event(2));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let dispatcher = EventDispatcher::new(EventDispatcherConfig { buffer: 2 });
        // Not started, so nothing drains the queue
        assert!(dispatcher.publish(event(1)));
        assert!(dispatcher.publish(event(2)));
        assert!(!dispatcher.publish(event(3)));
        assert_eq!(dispatcher.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let dispatcher = EventDispatcher::new(EventDispatcherConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.subscribe(forwarding_sink(tx));
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.sink_count(), 0);

        dispatcher.start(&Handle::current());
        dispatcher.publish(event(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let dispatcher = EventDispatcher::new(EventDispatcherConfig::default());
        dispatcher.start(&Handle::current());
        dispatcher.start(&Handle::current());
        assert!(dispatcher.is_running());
        dispatcher.stop();
        assert!(!dispatcher.is_running());
    }
}
