//! Event broadcasting
//!
//! Hands decoded dispatches from the connection task to application sinks.

mod dispatcher;

pub use dispatcher::{EventDispatcher, EventDispatcherConfig, EventSink, SinkId};
