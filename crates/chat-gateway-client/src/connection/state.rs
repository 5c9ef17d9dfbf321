//! Connection lifecycle state machine
//!
//! The transition table is plain data: [`StateMachine::transition`] answers
//! what a trigger does in a state without touching anything, and
//! [`StateMachine::fire`] applies the answer.

use std::fmt;

use crate::error::{GatewayError, GatewayResult};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// Resolving the gateway URL and opening the socket
    Connecting,
    /// Socket open
    Connected,
    /// Handshake sent, waiting for READY
    Loading,
    /// Session established
    Ready,
}

impl ConnectionState {
    pub const ALL: [Self; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Loading,
        Self::Ready,
    ];

    /// The state this one is nested in, if any
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Loading | Self::Ready => Some(Self::Connected),
            _ => None,
        }
    }

    /// Whether `self` is `other` or one of its sub-states
    #[must_use]
    pub fn is_in(self, other: Self) -> bool {
        self == other || self.parent() == Some(other)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Connect,
    ConnectOk,
    ConnectFail,
    Load,
    LoadOk,
    Disconnect,
}

impl Trigger {
    pub const ALL: [Self; 6] = [
        Self::Connect,
        Self::ConnectOk,
        Self::ConnectFail,
        Self::Load,
        Self::LoadOk,
        Self::Disconnect,
    ];
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a legal trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to a new state and run its entry action
    Enter(ConnectionState),
    /// Accepted without effect
    Ignore,
}

/// Holds the current state and applies the transition table
#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Look up a (state, trigger) pair in the table
    pub fn transition(state: ConnectionState, trigger: Trigger) -> GatewayResult<Transition> {
        use ConnectionState as S;
        use Trigger as T;

        match (state, trigger) {
            (S::Disconnected, T::Connect) => Ok(Transition::Enter(S::Connecting)),
            (S::Disconnected, T::Disconnect) => Ok(Transition::Ignore),
            (S::Connecting, T::ConnectOk) => Ok(Transition::Enter(S::Connected)),
            (S::Connecting, T::ConnectFail) => Ok(Transition::Enter(S::Disconnected)),
            (S::Connected, T::Load) => Ok(Transition::Enter(S::Loading)),
            (S::Loading, T::LoadOk) => Ok(Transition::Enter(S::Ready)),
            (S::Loading | S::Ready, T::Load) => Ok(Transition::Ignore),
            (S::Connected | S::Loading | S::Ready, T::Disconnect) => {
                Ok(Transition::Enter(S::Disconnected))
            }
            _ => Err(GatewayError::IllegalTransition { state, trigger }),
        }
    }

    /// Apply a trigger, returning the transition taken
    ///
    /// On error the state is unchanged.
    pub fn fire(&mut self, trigger: Trigger) -> GatewayResult<Transition> {
        let transition = Self::transition(self.state, trigger)?;
        if let Transition::Enter(next) = transition {
            tracing::debug!(from = %self.state, to = %next, trigger = %trigger, "State transition");
            self.state = next;
        }
        Ok(transition)
    }
}
