use std::time::Duration;

use super::types::RetryConfig;

/// Exponential reconnect backoff with a hard attempt budget.
///
/// Delay for attempt `n` (1-indexed) is `min(base * 2^(n-1), cap)`. The
/// counter only resets on a confirmed open, so a flapping connection keeps
/// climbing the curve instead of hammering the server.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            base: retry.base,
            cap: retry.cap,
            max_attempts: retry.max_attempts,
            attempt: 0,
        }
    }

    /// Record a failed attempt and yield the delay before the next try,
    /// or `None` once the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let shift = (self.attempt - 1).min(30);
        let delay = self
            .base
            .checked_mul(1u32 << shift)
            .map_or(self.cap, |delay| delay.min(self.cap));
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_attempts: u32) -> ReconnectBackoff {
        ReconnectBackoff::new(RetryConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts,
        })
    }

    #[test]
    fn delays_double_until_the_cap() {
        let mut policy = backoff(8);
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|delay| delay.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn budget_exhaustion_is_a_hard_stop() {
        let mut policy = backoff(5);
        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }
        assert_eq!(policy.attempt(), 5);
        assert!(policy.next_delay().is_none());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_the_curve() {
        let mut policy = backoff(5);
        policy.next_delay();
        policy.next_delay();
        policy.next_delay();
        assert_eq!(policy.attempt(), 3);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut policy = ReconnectBackoff::new(RetryConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 64,
        });
        let mut last = Duration::ZERO;
        while let Some(delay) = policy.next_delay() {
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(30));
    }
}
