//! Session identity
//!
//! The session id handed out in READY and the last dispatch sequence seen.
//! Together they decide whether the next handshake is an Identify or a Resume.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Sequence value before any dispatch was applied
pub const NO_SEQUENCE: i64 = -1;

#[derive(Debug)]
pub struct SessionIdentity {
    session_id: RwLock<Option<String>>,
    last_sequence: Arc<AtomicI64>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: RwLock::new(None),
            last_sequence: Arc::new(AtomicI64::new(NO_SEQUENCE)),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.write() = Some(session_id.into());
    }

    #[must_use]
    pub fn last_sequence(&self) -> i64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Shared view of the sequence, read by the heartbeat task
    #[must_use]
    pub fn sequence_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.last_sequence)
    }

    /// Record a dispatch sequence if it moves forward
    ///
    /// Returns `false` (and logs) for a sequence that is not strictly greater
    /// than the last one; the stored value is left alone.
    pub fn apply_sequence(&self, sequence: u64) -> bool {
        let Ok(sequence) = i64::try_from(sequence) else {
            tracing::warn!(sequence, "Dispatch sequence out of range, ignoring");
            return false;
        };

        let previous = self.last_sequence.fetch_max(sequence, Ordering::SeqCst);
        if sequence > previous {
            true
        } else {
            tracing::warn!(
                sequence,
                last_sequence = previous,
                "Non-increasing dispatch sequence, not applied"
            );
            false
        }
    }

    /// Seed a stored session so the next handshake resumes it
    pub fn restore(&self, session_id: impl Into<String>, last_sequence: i64) {
        *self.session_id.write() = Some(session_id.into());
        self.last_sequence.store(last_sequence, Ordering::SeqCst);
    }

    /// Forget the session after the server invalidated it
    pub fn invalidate(&self) {
        *self.session_id.write() = None;
        self.last_sequence.store(NO_SEQUENCE, Ordering::SeqCst);
    }

    /// Whether a Resume is possible
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.read().is_some()
    }
}
