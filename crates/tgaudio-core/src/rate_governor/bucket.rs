use std::time::{Duration, Instant};

/// Floor the adaptive refill rate can never drop below, so a sequence of
/// penalties can't wedge the bucket permanently shut.
const MIN_REFILL_RATE: f64 = 0.1;
/// How long a penalty-free window must last before [`TokenBucket::maybe_recover`]
/// nudges the rate back up.
const RECOVERY_WINDOW: Duration = Duration::from_secs(60);
/// Multiplicative step applied on penalty / recovery, mirroring the
/// adaptive segment-count stepping this is grounded on.
const PENALTY_FACTOR: f64 = 0.5;
const RECOVERY_FACTOR: f64 = 1.25;

/// Pure token-bucket state. Kept free of async/IO so the stepping logic is
/// exercised directly in tests without needing to mock wall-clock time.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    target_rate: f64,
    current_rate: f64,
    tokens: f64,
    last_refill: Instant,
    penalized_until: Option<Instant>,
    last_penalty_or_start: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, target_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            target_rate,
            current_rate: target_rate,
            tokens: capacity as f64,
            last_refill: now,
            penalized_until: None,
            last_penalty_or_start: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.current_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// How long the caller must still wait before `n` tokens are available,
    /// or `None` if they're available right now. Does not mutate state
    /// beyond advancing the refill clock.
    pub fn wait_for(&mut self, n: u32, now: Instant) -> Option<Duration> {
        if let Some(until) = self.penalized_until {
            if now < until {
                return Some(until.saturating_duration_since(now));
            }
            self.penalized_until = None;
        }

        self.refill(now);
        let need = n as f64;
        if self.tokens >= need {
            return None;
        }
        let deficit = need - self.tokens;
        let rate = self.current_rate.max(MIN_REFILL_RATE);
        Some(Duration::from_secs_f64(deficit / rate))
    }

    /// Deducts `n` tokens. Caller must have already observed `wait_for` return
    /// `None` for this `now` (or slept past it).
    pub fn take(&mut self, n: u32, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens - n as f64).max(0.0);
    }

    /// Drains the bucket, freezes admission for `wait` and halves the refill
    /// rate (floored), in response to a flood-wait signal from the remote.
    pub fn penalize(&mut self, wait: Duration, now: Instant) {
        self.tokens = 0.0;
        self.penalized_until = Some(now + wait);
        self.current_rate = (self.current_rate * PENALTY_FACTOR).max(MIN_REFILL_RATE);
        self.last_penalty_or_start = now;
    }

    /// Multiplicatively restores the refill rate toward its configured
    /// target. Safe to call unconditionally; it is a no-op if called again
    /// immediately (see [`TokenBucket::maybe_recover`] for the timed variant).
    pub fn recover(&mut self, now: Instant) {
        self.current_rate = (self.current_rate * RECOVERY_FACTOR).min(self.target_rate);
        self.last_penalty_or_start = now;
    }

    /// Calls [`TokenBucket::recover`] only if a full [`RECOVERY_WINDOW`] has
    /// elapsed without a penalty, and the rate hasn't already reached target.
    pub fn maybe_recover(&mut self, now: Instant) {
        if self.current_rate >= self.target_rate {
            return;
        }
        if now.saturating_duration_since(self.last_penalty_or_start) >= RECOVERY_WINDOW {
            self.recover(now);
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_immediately_when_tokens_available() {
        let now = Instant::now();
        let mut b = TokenBucket::new(10, 1.0, now);
        assert_eq!(b.wait_for(5, now), None);
        b.take(5, now);
        assert_eq!(b.wait_for(5, now), None);
    }

    #[test]
    fn waits_when_bucket_is_empty() {
        let now = Instant::now();
        let mut b = TokenBucket::new(2, 1.0, now);
        b.take(2, now);
        let wait = b.wait_for(1, now).expect("should need to wait");
        assert!(wait > Duration::from_millis(0));
    }

    #[test]
    fn penalize_blocks_and_halves_rate() {
        let now = Instant::now();
        let mut b = TokenBucket::new(10, 4.0, now);
        b.penalize(Duration::from_secs(5), now);
        assert_eq!(b.current_rate(), 2.0);
        let wait = b.wait_for(1, now).unwrap();
        assert!(wait >= Duration::from_secs(4));

        let later = now + Duration::from_secs(6);
        assert_eq!(b.wait_for(1, later), None);
    }

    #[test]
    fn recover_raises_rate_toward_target() {
        let now = Instant::now();
        let mut b = TokenBucket::new(10, 4.0, now);
        b.penalize(Duration::from_secs(1), now);
        assert_eq!(b.current_rate(), 2.0);
        b.recover(now);
        assert_eq!(b.current_rate(), 2.5);
    }

    #[test]
    fn rate_never_drops_below_floor() {
        let now = Instant::now();
        let mut b = TokenBucket::new(10, 1.0, now);
        for _ in 0..20 {
            b.penalize(Duration::from_millis(1), now);
        }
        assert!(b.current_rate() >= MIN_REFILL_RATE);
    }

    #[test]
    fn maybe_recover_waits_for_the_full_window() {
        let now = Instant::now();
        let mut b = TokenBucket::new(10, 4.0, now);
        b.penalize(Duration::from_millis(1), now);
        let soon = now + Duration::from_secs(10);
        b.maybe_recover(soon);
        assert_eq!(b.current_rate(), 2.0, "recovery window hasn't elapsed yet");

        let later = now + RECOVERY_WINDOW + Duration::from_secs(1);
        b.maybe_recover(later);
        assert_eq!(b.current_rate(), 2.5);
    }
}
