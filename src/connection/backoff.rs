//! Reconnection backoff policy.
//!
//! Delay before reconnect attempt `n` (1-based):
//!
//! ```text
//! min(initial_delay * multiplier^(n-1), max_delay) + uniform(0..=jitter)
//! ```
//!
//! With `max_attempts` set, the manager gives up after that many failed
//! attempts and the connection ends in the closed state.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default first reconnect delay.
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Default delay ceiling.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default jitter bound.
const DEFAULT_JITTER: Duration = Duration::from_millis(250);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Backoff-with-jitter schedule for the direct transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound of the deterministic part of the delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: u32,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
    /// Attempts allowed before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: 2,
            jitter: DEFAULT_JITTER,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Retries immediately and forever.
    #[inline]
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
            jitter: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// Sets the first delay.
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Sets the jitter bound.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Caps the number of attempts.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns `true` if attempt `attempt` (1-based) may be made.
    #[inline]
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Deterministic part of the delay before attempt `attempt`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay.max(self.initial_delay))
    }

    /// Full delay before attempt `attempt`, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return base;
        }
        base.saturating_add(Duration::from_millis(rand::random_range(0..=jitter_ms)))
    }
}

// ============================================================================
// Tests
// ============================================================================
