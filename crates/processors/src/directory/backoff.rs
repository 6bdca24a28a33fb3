//! Exponential backoff for directory transport retries (§7): base 1.0 s,
//! factor 1.5, capped at 60 s.

use std::time::Duration;

/// Base retry delay.
pub const BASE: Duration = Duration::from_secs(1);
/// Growth factor applied after every failed attempt.
pub const FACTOR: f64 = 1.5;
/// Upper bound on the delay between retries.
pub const CAP: Duration = Duration::from_secs(60);

/// Yields successive backoff delays starting at [`BASE`], growing by
/// [`FACTOR`] each step and saturating at [`CAP`].
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { next: BASE }
    }
}

impl Backoff {
    /// The delay to wait before the next retry, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let scaled = self.next.as_secs_f64() * FACTOR;
        self.next = Duration::from_secs_f64(scaled).min(CAP);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_factor_and_saturates_at_cap() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(1.0));
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(1.5));
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(2.25));

        let mut backoff = Backoff::default();
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert!(backoff.next_delay() <= CAP);
    }
}
