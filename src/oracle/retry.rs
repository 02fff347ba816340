use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Result of one attempt at a fallible operation.
#[derive(Debug)]
pub enum Outcome<T, E> {
    Success(T),
    Retryable {
        error: E,
        retry_after: Option<Duration>,
    },
    Terminal(E),
}

/// Bounded exponential backoff: attempt `n` (0-based) that fails retryably
/// waits `base_delay * 2^n` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// The wait after failed attempt `attempt`. A server-provided hint only
    /// ever lengthens the computed delay.
    pub fn wait_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match retry_after {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }

    pub fn run<T, E: Display>(
        &self,
        mut operation: impl FnMut(u32) -> Outcome<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 0u32;
        loop {
            match operation(attempt) {
                Outcome::Success(value) => return Ok(value),
                Outcome::Terminal(error) => return Err(error),
                Outcome::Retryable { error, retry_after } => {
                    if attempt >= self.max_retries {
                        return Err(error);
                    }
                    let wait = self.wait_for(attempt, retry_after);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.wait_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.wait_for(1, None), Duration::from_secs(2));
        assert_eq!(policy.wait_for(2, None), Duration::from_secs(4));
    }

    #[test]
    fn retry_after_hint_only_extends_the_wait() {
        let policy = RetryPolicy::new(2, Duration::from_secs(2));
        assert_eq!(
            policy.wait_for(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.wait_for(1, Some(Duration::from_secs(1))),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn retryable_failures_stop_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let mut attempts = Vec::new();

        let result: Result<(), String> = policy.run(|attempt| {
            attempts.push(attempt);
            Outcome::Retryable {
                error: format!("boom {attempt}"),
                retry_after: None,
            }
        });

        assert_eq!(result, Err("boom 2".to_string()));
        assert_eq!(attempts, vec![0, 1, 2]);
    }

    #[test]
    fn terminal_failure_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;

        let result: Result<(), &str> = policy.run(|_| {
            calls += 1;
            Outcome::Terminal("bad payload")
        });

        assert_eq!(result, Err("bad payload"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn success_after_transient_failure() {
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<u32, &str> = policy.run(|attempt| {
            if attempt == 0 {
                Outcome::Retryable {
                    error: "timeout",
                    retry_after: None,
                }
            } else {
                Outcome::Success(attempt)
            }
        });

        assert_eq!(result, Ok(1));
    }
}
