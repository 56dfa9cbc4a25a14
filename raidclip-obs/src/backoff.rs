use std::time::Duration;

use rand::Rng;

/// Capped doubling with jitter.
///
/// Jitter stretches a delay by at most `max_jitter` of itself and is only
/// applied below the cap, so successive delays never shrink and settle on
/// exactly `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    max_jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap: cap.max(initial),
            max_jitter: 0.1,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::rng().random_range(0.0..=self.max_jitter);
        self.next_delay_with(jitter)
    }

    /// `jitter` is a fraction in `0.0..=max_jitter`.
    pub fn next_delay_with(&mut self, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.attempt = self.attempt.saturating_add(1);

        let base = self.initial.saturating_mul(factor);
        if base >= self.cap {
            return self.cap;
        }
        let jitter = jitter.clamp(0.0, self.max_jitter);
        base.mul_f64(1.0 + jitter).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_then_caps() {
        let mut b = Backoff::default();
        let delays: Vec<u64> = (0..9).map(|_| b.next_delay_with(0.0).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_random_jitter_is_non_decreasing_and_capped() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
        let mut prev = Duration::ZERO;
        for _ in 0..200 {
            let d = b.next_delay();
            assert!(d >= prev, "{:?} < {:?}", d, prev);
            assert!(d <= Duration::from_secs(5));
            prev = d;
        }
        assert_eq!(prev, Duration::from_secs(5));
    }

    #[test]
    fn test_reset_starts_over() {
        let mut b = Backoff::default();
        b.next_delay_with(0.0);
        b.next_delay_with(0.0);
        b.reset();
        assert_eq!(b.next_delay_with(0.0), Duration::from_secs(1));
        let jittered = b.next_delay_with(0.1);
        assert!(jittered >= Duration::from_millis(2199) && jittered <= Duration::from_millis(2201));
    }
}
