//! Exponential backoff driven by consecutive rate-limit signals.
//!
//! The throttle level counts rate-limit responses since the last successful
//! delivery. Every rate-limit signal raises it by one, every success lowers
//! it by one, and the pause between deliveries is
//! `(base^level - 1) * 1000` milliseconds.

use std::time::Duration;

/// Tracks the throttle level and the delay it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleController {
    base: f64,
    level: u32,
    interval_ms: f64,
}

impl ThrottleController {
    /// Creates an unthrottled controller with the given growth factor.
    pub fn new(base: f64) -> Self {
        Self { base, level: 0, interval_ms: 0.0 }
    }

    /// Raises the level by one. Returns the new level.
    pub fn increase(&mut self) -> u32 {
        self.level = self.level.saturating_add(1);
        self.recompute();
        self.level
    }

    /// Lowers the level by one.
    ///
    /// Returns `None` without changing anything when already unthrottled.
    pub fn decrease(&mut self) -> Option<u32> {
        if self.level == 0 {
            return None;
        }
        self.level -= 1;
        self.recompute();
        Some(self.level)
    }

    /// Drops back to level zero.
    pub fn reset(&mut self) {
        self.level = 0;
        self.interval_ms = 0.0;
    }

    /// Current throttle level.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Whether deliveries are currently being paused.
    pub fn is_throttled(&self) -> bool {
        self.level > 0
    }

    /// Current delay between deliveries in milliseconds.
    pub fn current_interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Current delay between deliveries.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    fn recompute(&mut self) {
        let exponent = i32::try_from(self.level).unwrap_or(i32::MAX);
        self.interval_ms = ((self.base.powi(exponent) - 1.0) * 1000.0).round();
    }
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::new(crate::DEFAULT_THROTTLE_BASE)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn expected_ms(level: u32) -> f64 {
        ((1.05_f64.powi(level as i32) - 1.0) * 1000.0).round()
    }

    #[test]
    fn starts_unthrottled() {
        let throttle = ThrottleController::default();
        assert_eq!(throttle.level(), 0);
        assert_eq!(throttle.current_interval(), Duration::ZERO);
        assert!(!throttle.is_throttled());
    }

    #[test]
    fn increase_follows_exponential_curve() {
        let mut throttle = ThrottleController::default();

        assert_eq!(throttle.increase(), 1);
        assert_eq!(throttle.current_interval_ms(), 50.0);
        assert_eq!(throttle.increase(), 2);
        assert_eq!(throttle.current_interval_ms(), expected_ms(2));
        assert_eq!(throttle.increase(), 3);
        assert_eq!(throttle.current_interval_ms(), expected_ms(3));
        assert!(throttle.current_interval() > Duration::from_millis(150));
    }

    #[test]
    fn decrease_floors_at_zero() {
        let mut throttle = ThrottleController::default();
        assert_eq!(throttle.decrease(), None);

        throttle.increase();
        assert_eq!(throttle.decrease(), Some(0));
        assert_eq!(throttle.current_interval_ms(), 0.0);
        assert_eq!(throttle.decrease(), None);
    }

    #[test]
    fn reset_clears_level() {
        let mut throttle = ThrottleController::default();
        throttle.increase();
        throttle.increase();
        throttle.reset();
        assert_eq!(throttle.level(), 0);
        assert_eq!(throttle.current_interval_ms(), 0.0);
    }

    proptest! {
        #[test]
        fn n_signals_match_formula(n in 0u32..200) {
            let mut throttle = ThrottleController::default();
            for _ in 0..n {
                throttle.increase();
            }
            prop_assert_eq!(throttle.level(), n);
            prop_assert_eq!(throttle.current_interval_ms(), expected_ms(n));
        }

        #[test]
        fn one_success_lowers_exactly_one_level(n in 1u32..100) {
            let mut throttle = ThrottleController::default();
            for _ in 0..n {
                throttle.increase();
            }
            prop_assert_eq!(throttle.decrease(), Some(n - 1));
            prop_assert_eq!(throttle.current_interval_ms(), expected_ms(n - 1));
        }

        #[test]
        fn interval_is_monotonic_in_level(n in 0u32..150) {
            let mut throttle = ThrottleController::default();
            let mut previous = throttle.current_interval_ms();
            for _ in 0..n {
                throttle.increase();
                prop_assert!(throttle.current_interval_ms() >= previous);
                previous = throttle.current_interval_ms();
            }
        }
    }
}
