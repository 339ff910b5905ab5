use std::{future::Future, time::Duration};

use log::*;
use rand::Rng;

use crate::engine_api::EngineError;

/// A bounded retry budget with linearly increasing back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Pause after the given (1-based) failed attempt: `base_delay * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the policy's attempts are used up.
///
/// `op` must re-read everything it depends on. Re-issuing a stale write would just fail again.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                // A little jitter keeps competing writers from colliding in lockstep
                let jitter = rand::thread_rng().gen_range(0..=policy.base_delay.as_millis() as u64);
                let delay = policy.delay_for(attempt) + Duration::from_millis(jitter);
                debug!("🔄️ {label}: attempt {attempt}/{} failed ({e}). Retrying in {delay:?}", policy.max_attempts);
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) if e.is_transient() => {
                warn!("🔄️ {label}: giving up after {attempt} attempts. {e}");
                return Err(e);
            },
            result => return result,
        }
    }
}
