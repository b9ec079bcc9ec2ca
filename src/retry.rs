use std::{fmt::Display, future::Future, time::Duration};

use tracing::warn;

use crate::clock::Clock;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff settings for quota-style failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(0.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Runs `op`, retrying transient failures with backoff. `op` is called at
/// most `max_retries + 1` times; the last error is returned on exhaustion.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, clock: &dyn Clock, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Quota limit reached: {}. Retrying in {:.1} seconds... (attempt {}/{})",
                    err,
                    delay.as_secs_f64(),
                    attempt + 1,
                    policy.max_retries
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Quota,
        Auth,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Quota => write!(f, "429 RESOURCE_EXHAUSTED"),
                TestError::Auth => write!(f, "401 unauthenticated"),
            }
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool { matches!(self, TestError::Quota) }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, ..RetryPolicy::default() }
    }

    #[test]
    fn delay_grows_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..8).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn fractional_multiplier_is_honoured() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_plus_one_calls() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(3), &clock, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Quota) }
        })
        .await;
        assert!(matches!(result, Err(TestError::Quota)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(5), &clock, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Auth) }
        })
        .await;
        assert!(matches!(result, Err(TestError::Auth)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), &clock, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(TestError::Quota) } else { Ok("image") } }
        })
        .await;
        assert_eq!(result.ok(), Some("image"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
