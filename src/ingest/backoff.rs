use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter: base 500ms, cap 30s (spec §4.3, §5).
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            attempt: 0,
        }
    }

    /// Returns the delay for the next attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << self.attempt.min(16));
        let capped = exp.min(self.cap.as_millis());
        self.attempt += 1;

        let jitter_fraction: f64 = rand::thread_rng().gen_range(0.5..1.0);
        let jittered = (capped as f64 * jitter_fraction) as u64;
        Duration::from_millis(jittered.max(1))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let mut b = Backoff::new();
        let first = b.next_delay();
        assert!(first <= Duration::from_millis(500));
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut b = Backoff::new();
        for _ in 0..10 {
            b.next_delay();
        }
        b.reset();
        let d = b.next_delay();
        assert!(d <= Duration::from_millis(500));
    }
}
