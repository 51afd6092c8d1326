use std::time;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The retry policy used when a stop request cannot be delivered to the orchestrator.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Total attempts per stop request, including the first one.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow the (zero-based) `attempt` that just failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Calculate the time to wait after the (zero-based) `attempt` failed.
    /// A `preferred_retry_interval` (e.g. from a Retry-After header) wins over the backoff,
    /// but never over `maximum_interval`.
    pub fn time_until_next_retry(
        &self,
        attempt: u32,
        preferred_retry_interval: Option<time::Duration>,
    ) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match (preferred_retry_interval, self.maximum_interval) {
            (Some(duration), Some(max_interval)) => std::cmp::min(
                std::cmp::max(std::cmp::min(candidate_interval, max_interval), duration),
                max_interval,
            ),
            (Some(duration), None) => std::cmp::max(candidate_interval, duration),
            (None, Some(max_interval)) => std::cmp::min(candidate_interval, max_interval),
            (None, None) => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: Some(time::Duration::from_secs(30)),
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_millis(100),
            Some(time::Duration::from_millis(500)),
            5,
        );

        assert_eq!(
            policy.time_until_next_retry(0, None),
            time::Duration::from_millis(100)
        );
        assert_eq!(
            policy.time_until_next_retry(2, None),
            time::Duration::from_millis(400)
        );
        assert_eq!(
            policy.time_until_next_retry(3, None),
            time::Duration::from_millis(500)
        );
        assert_eq!(
            policy.time_until_next_retry(u32::MAX, None),
            time::Duration::from_millis(500)
        );
    }

    #[test]
    fn test_preferred_interval() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_millis(100),
            Some(time::Duration::from_secs(5)),
            5,
        );

        assert_eq!(
            policy.time_until_next_retry(0, Some(time::Duration::from_secs(2))),
            time::Duration::from_secs(2)
        );
        assert_eq!(
            policy.time_until_next_retry(0, Some(time::Duration::from_secs(60))),
            time::Duration::from_secs(5)
        );
    }

    #[test]
    fn test_attempts() {
        let policy = RetryPolicy::new(2, time::Duration::from_millis(1), None, 3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        let policy = RetryPolicy::new(2, time::Duration::from_millis(1), None, 0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(0));
    }
}
