use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;

pub const WINDOW: Duration = Duration::from_secs(60);

/// Quota for any model missing from the table.
pub const DEFAULT_QUOTA: u32 = 1;

/// Requests-per-minute quotas for the Imagen models we call.
pub fn imagen_quotas() -> HashMap<String, u32> {
    [
        ("imagen-3.0-capability", 10),
        ("imagen-3.0-fast-generate", 20),
        ("imagen-3.0-fast-generate-001", 20),
        ("imagen-3.0-generate", 1),
        ("imagen-3.0-generate-001", 1),
        ("imagen-exp", 1),
    ]
    .into_iter()
    .map(|(model, quota)| (model.to_string(), quota))
    .collect()
}

/// Per-model sliding-window limiter. `acquire` never rejects, it only delays.
pub struct RateLimiter {
    quotas: HashMap<String, u32>,
    window: Duration,
    clock: Arc<dyn Clock>,
    admitted: Mutex<HashMap<String, VecDeque<Duration>>>,
}

impl RateLimiter {
    pub fn new(quotas: HashMap<String, u32>, clock: Arc<dyn Clock>) -> Self {
        Self { quotas, window: WINDOW, clock, admitted: Mutex::default() }
    }

    pub fn with_imagen_quotas(clock: Arc<dyn Clock>) -> Self {
        Self::new(imagen_quotas(), clock)
    }

    pub fn quota_for(&self, model: &str) -> u32 {
        self.quotas.get(model).copied().unwrap_or(DEFAULT_QUOTA).max(1)
    }

    pub async fn acquire(&self, model: &str) {
        let quota = self.quota_for(model) as usize;
        loop {
            let wait = {
                let mut admitted = self.admitted.lock();
                let now = self.clock.now();
                let history = admitted.entry(model.to_string()).or_default();
                while let Some(&oldest) = history.front() {
                    if now.saturating_sub(oldest) >= self.window {
                        history.pop_front();
                    } else {
                        break;
                    }
                }
                if history.len() < quota {
                    history.push_back(now);
                    debug!("Request {}/{} for model {} this window", history.len(), quota, model);
                    return;
                }
                let oldest = history.front().copied().unwrap_or(now);
                self.window.saturating_sub(now.saturating_sub(oldest))
            };
            info!(
                "⏳ Rate limit reached for model {}. Waiting {:.1} seconds...",
                model,
                wait.as_secs_f64()
            );
            self.clock.sleep(wait).await;
        }
    }
}
