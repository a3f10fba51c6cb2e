use std::{future::Future, time::Duration};

use log::*;

/// Bounded exponential backoff. The n-th retry waits `base_delay * 2^(n-1)`, capped at `max_delay`, and no more than
/// `max_attempts` attempts are made in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
    }

    /// The delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    /// Runs `op` until it succeeds or the attempts run out. The last error is returned.
    pub async fn retry<F, Fut, T, E>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("🔁️ {label} failed after {attempt} attempts. Giving up. {e}");
                    return Err(e);
                },
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!("🔁️ {label} failed on attempt {attempt}. Retrying in {delay:?}. {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}
