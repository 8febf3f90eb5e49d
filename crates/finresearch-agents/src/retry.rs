use std::time::Duration;

use finresearch_models::RetryConfig;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    Exhausted,
}

/// Attempt counter with capped exponential backoff.
///
/// `max_attempts` counts the first attempt; a budget of 1 never retries.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            attempts: 0,
        }
    }

    /// Mark the start of an attempt. Returns the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a failed attempt.
    pub fn record_failure(&self) -> RetryDecision {
        if self.attempts >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        let shift = self.attempts.saturating_sub(1).min(20);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        RetryDecision::Retry {
            after: Duration::from_millis(delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_attempts: u32, base: u64, max: u64) -> RetryBudget {
        RetryBudget::new(&RetryConfig {
            max_attempts,
            base_delay_ms: base,
            max_delay_ms: max,
        })
    }

    #[test]
    fn exponential_then_capped() {
        let mut b = budget(5, 100, 300);
        let mut delays = vec![];
        loop {
            b.begin_attempt();
            match b.record_failure() {
                RetryDecision::Retry { after } => delays.push(after.as_millis() as u64),
                RetryDecision::Exhausted => break,
            }
        }
        assert_eq!(delays, vec![100, 200, 300, 300]);
        assert_eq!(b.attempts(), 5);
    }

    #[test]
    fn single_attempt_never_retries() {
        let mut b = budget(1, 100, 1000);
        assert_eq!(b.begin_attempt(), 1);
        assert_eq!(b.record_failure(), RetryDecision::Exhausted);
    }

    #[test]
    fn zero_attempts_treated_as_one() {
        let mut b = budget(0, 100, 1000);
        b.begin_attempt();
        assert_eq!(b.record_failure(), RetryDecision::Exhausted);
    }
}
