//! Dial retry backoff.
//!
//! Dialers double their retry delay on each failed connection attempt,
//! bounded above by a configured maximum, and reset on success.

use std::time::Duration;

use crate::options::SocketOptions;

/// Bounded exponential backoff tracker.
///
/// # Example
///
/// ```
/// use filament_core::backoff::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
///
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(400));
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    /// Create a tracker from explicit bounds.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
            current: base,
        }
    }

    /// Create a tracker from socket options.
    #[must_use]
    pub const fn from_options(options: &SocketOptions) -> Self {
        Self::new(options.reconnect_min, options.reconnect_max)
    }

    /// Delay to wait before the next attempt.
    ///
    /// Doubles with each call until it reaches the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt += 1;
        self.current = self
            .base
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.max);
        delay
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.base;
    }

    /// Number of attempts since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.next_delay(), Duration::from_millis(800));
        assert_eq!(b.attempt(), 4);
    }

    #[test]
    fn capped_at_max() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn reset_restores_base() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        b.next_delay();
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempt(), 3);

        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
