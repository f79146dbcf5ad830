use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::bucket::TokenBucket;

/// Adaptive token-bucket admission control shared by every worker.
///
/// `acquire` genuinely suspends the caller (rather than busy-polling) so
/// contending workers queue up FIFO behind the bucket's mutex; `penalize`
/// reacts to a transport flood-wait signal, and `recover` is exposed for
/// callers (or a periodic background tick) that want to nudge the rate back
/// up without waiting for the full recovery window.
pub struct RateGovernor {
    state: Mutex<TokenBucket>,
}

impl RateGovernor {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            state: Mutex::new(TokenBucket::new(capacity, refill_per_second, Instant::now())),
        }
    }

    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self::new(cfg.rate_capacity, cfg.rate_refill_per_second)
    }

    /// Suspends until `n` tokens are available, then deducts them.
    pub async fn acquire(&self, n: u32) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.maybe_recover(now);
                match state.wait_for(n, now) {
                    None => {
                        state.take(n, now);
                        return;
                    }
                    Some(d) => d,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Drains the bucket and suspends all future `acquire` calls for at
    /// least `wait`, reducing the refill rate.
    pub async fn penalize(&self, wait: Duration) {
        let mut state = self.state.lock().await;
        state.penalize(wait, Instant::now());
    }

    /// Explicitly nudges the refill rate back toward its target, bypassing
    /// the timed recovery window.
    pub async fn recover(&self) {
        let mut state = self.state.lock().await;
        state.recover(Instant::now());
    }

    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.current_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn acquire_returns_immediately_with_tokens_available() {
        let gov = RateGovernor::new(5, 1.0);
        let start = Instant::now();
        gov.acquire(3).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_suspends_until_refill() {
        let gov = RateGovernor::new(1, 10.0);
        gov.acquire(1).await;
        let acquired_at = Arc::new(Mutex::new(None));
        let acquired_at2 = acquired_at.clone();
        let gov = Arc::new(gov);
        let gov2 = gov.clone();

        let handle = tokio::spawn(async move {
            gov2.acquire(1).await;
            *acquired_at2.lock().await = Some(Instant::now());
        });
        tokio::time::advance(Duration::from_millis(200)).await;
        handle.await.unwrap();
        assert!(acquired_at.lock().await.is_some());
    }

    #[tokio::test]
    async fn fairness_under_contention_is_within_one_slot() {
        let gov = Arc::new(RateGovernor::new(4, 1000.0));
        let counts: Vec<Arc<AtomicU32>> = (0..4).map(|_| Arc::new(AtomicU32::new(0))).collect();
        let mut handles = Vec::new();
        for c in &counts {
            let gov = gov.clone();
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    gov.acquire(1).await;
                    c.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let values: Vec<u32> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        let total: u32 = values.iter().sum();
        assert_eq!(total, 80);
        let min = *values.iter().min().unwrap();
        let max = *values.iter().max().unwrap();
        assert!(max - min <= 1, "acquisitions should be within one slot of each other, got {values:?}");
    }

    #[tokio::test]
    async fn penalize_then_recover_changes_rate() {
        let gov = RateGovernor::new(10, 4.0);
        gov.penalize(Duration::from_millis(1)).await;
        assert_eq!(gov.current_rate().await, 2.0);
        gov.recover().await;
        assert_eq!(gov.current_rate().await, 2.5);
    }
}
