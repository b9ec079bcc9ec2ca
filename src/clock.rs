use async_trait::async_trait;
use std::time::Duration;

/// Time source for everything that waits: the rate limiter, the retry loop
/// and the batch driver's inter-item delay.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time elapsed since the clock's origin.
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: tokio::time::Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Clock that only moves when told to. Sleeping advances it instantly.
#[cfg(test)]
#[derive(Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<Duration>,
    sleeps: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self { Self::default() }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}
