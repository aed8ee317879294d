// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy for transient provider and storage failures.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) sleeps `base_delay * multiplier^(n-1)` before the
/// next try, capped at `max_delay`. Only retriable failures
/// ([`rf_error::ErrorCode::is_retriable`]) consume extra attempts.
///
/// # Examples
///
/// ```
/// use rf_runner::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay_for(1), Duration::from_millis(250));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Hard cap on attempts per job.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Start building a custom policy.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Delay to sleep after the given 1-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let factor = self.multiplier.powi(exp as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Fluent builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: Option<RetryPolicy>,
}

impl RetryPolicyBuilder {
    fn policy(&mut self) -> &mut RetryPolicy {
        self.policy.get_or_insert_with(RetryPolicy::default)
    }

    /// Set the attempt cap.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy().max_attempts = n.max(1);
        self
    }

    /// Set the first-retry delay.
    #[must_use]
    pub fn base_delay(mut self, d: Duration) -> Self {
        self.policy().base_delay = d;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.policy().max_delay = d;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn multiplier(mut self, m: f64) -> Self {
        self.policy().multiplier = m.max(1.0);
        self
    }

    /// Finish the policy.
    #[must_use]
    pub fn build(mut self) -> RetryPolicy {
        self.policy().clone()
    }
}
