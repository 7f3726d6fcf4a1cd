// SPDX-License-Identifier: MIT
//! Backoff policy for external-call retries.
//!
//! Two consumers, one formula (`min(base * multiplier^attempt, max)`):
//! - the batch allocator retries failed allocations with a *fixed* delay
//!   (multiplier 1.0),
//! - the code-wait poll loop spaces transport-error retries with an
//!   *escalating* delay capped at the poll interval.

use std::time::Duration;

/// Configuration for [`BackoffPolicy::delay_for`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Multiplier applied per failed attempt. 1.0 = fixed delay.
    pub multiplier: f64,
    /// Upper bound on the computed delay.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Fixed delay between attempts (allocation retries).
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            multiplier: 1.0,
            max: delay,
        }
    }

    /// Escalating delay, doubling per attempt, capped at `max`
    /// (poll-loop transport errors).
    pub fn escalating(base: Duration, max: Duration) -> Self {
        Self {
            base,
            multiplier: 2.0,
            max,
        }
    }

    /// Delay to sleep after `attempt` failures (1-indexed: the delay taken
    /// between attempt N and attempt N+1 is `delay_for(N)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base.as_secs_f64();
        let raw = base * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_never_escalates() {
        let p = BackoffPolicy::fixed(Duration::from_secs(2));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(7), Duration::from_secs(2));
    }

    #[test]
    fn escalating_policy_doubles_and_caps() {
        let p = BackoffPolicy::escalating(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        // Capped from here on.
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(12), Duration::from_secs(10));
    }

    #[test]
    fn attempt_zero_uses_base() {
        let p = BackoffPolicy::escalating(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
    }
}
