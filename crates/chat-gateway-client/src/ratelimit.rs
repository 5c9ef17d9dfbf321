//! Outbound send budget
//!
//! A fixed set of charge slots over a sliding period. Each admitted send
//! claims one slot; a slot frees again once its charge is a full period old.

use std::fmt;
use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tokio::time::Instant;

use chat_common::RateLimitConfig;

use crate::error::{GatewayError, GatewayResult};

/// Sliding-window admission control shared by every gateway send
pub struct RateLimiter {
    label: String,
    period: Duration,
    /// `None` marks a slot that was never charged (or was reset)
    charges: RwLock<Vec<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_charges` sends per `period`
    ///
    /// # Panics
    /// Panics if `max_charges` is zero.
    #[must_use]
    pub fn new(label: impl Into<String>, max_charges: usize, period: Duration) -> Self {
        assert!(max_charges > 0, "rate limiter needs at least one charge");
        Self {
            label: label.into(),
            period,
            charges: RwLock::new(vec![None; max_charges]),
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(label: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self::new(label, config.max_charges, config.period())
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn max_charges(&self) -> usize {
        self.charges.read().len()
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Claim one charge
    ///
    /// # Errors
    /// `RateLimitExceeded` carrying `period - age` of the newest charge.
    pub fn mark(&self) -> GatewayResult<()> {
        let now = Instant::now();
        let charges = self.charges.upgradable_read();

        match self.free_slot(&charges, now) {
            Ok(index) => {
                // No other upgradable reader can run between the scan and the claim
                let mut charges = RwLockUpgradableReadGuard::upgrade(charges);
                charges[index] = Some(now);
                Ok(())
            }
            Err(retry_in) => {
                tracing::debug!(
                    limiter = %self.label,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Rate limit reached"
                );
                Err(GatewayError::RateLimitExceeded { retry_in })
            }
        }
    }

    /// Claim one charge, returning `Duration::ZERO` on success or the wait otherwise
    pub fn try_mark(&self) -> Duration {
        match self.mark() {
            Ok(()) => Duration::ZERO,
            Err(GatewayError::RateLimitExceeded { retry_in }) => retry_in,
            // mark only fails with RateLimitExceeded
            Err(_) => self.period,
        }
    }

    /// Claim one charge, sleeping until one frees up
    pub async fn acquire(&self) {
        loop {
            let wait = self.try_mark();
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Free every charge
    pub fn reset(&self) {
        self.charges.write().fill(None);
    }

    /// Charges available right now
    #[must_use]
    pub fn remaining_charges(&self) -> usize {
        let now = Instant::now();
        let charges = self.charges.read();
        charges
            .iter()
            .filter(|charge| !self.is_on_cooldown(**charge, now))
            .count()
    }

    #[must_use]
    pub fn has_charges(&self) -> bool {
        self.remaining_charges() > 0
    }

    fn is_on_cooldown(&self, charge: Option<Instant>, now: Instant) -> bool {
        charge.is_some_and(|at| now.saturating_duration_since(at) < self.period)
    }

    /// Index of a reusable slot, or the period left on the newest charge
    fn free_slot(&self, charges: &[Option<Instant>], now: Instant) -> Result<usize, Duration> {
        let mut min_age = self.period;
        for (index, charge) in charges.iter().enumerate() {
            let Some(at) = charge else {
                return Ok(index);
            };
            let age = now.saturating_duration_since(*at);
            if age >= self.period {
                return Ok(index);
            }
            min_age = min_age.min(age);
        }
        Err(self.period.saturating_sub(min_age))
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("label", &self.label)
            .field("period", &self.period)
            .field("max_charges", &self.max_charges())
            .field("remaining", &self.remaining_charges())
            .finish()
    }
}
