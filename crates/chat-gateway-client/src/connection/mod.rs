//! Connection lifecycle
//!
//! The state machine, the session identity used for resuming, and the
//! [`GatewaySession`] that drives both from socket events.

mod handler;
mod identity;
mod session;
mod state;

pub use identity::{SessionIdentity, NO_SEQUENCE};
pub use session::{GatewaySession, GatewaySessionBuilder};
pub use state::{ConnectionState, StateMachine, Transition, Trigger};
