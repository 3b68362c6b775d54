//! Buffers payloads until a size or age threshold seals a batch.
//!
//! Size-based flushing keeps request counts low under load; age-based
//! flushing keeps a quiet application's data from sitting in memory. The
//! worker checks both after every arrival and on every idle wake-up.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use outpost_core::{Batch, Clock, Feature, Payload};

/// Accumulates payloads for one feature.
#[derive(Debug)]
pub struct BatchAccumulator {
    feature: Feature,
    max_count: usize,
    max_age: Duration,
    items: Vec<Payload>,
    oldest: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl BatchAccumulator {
    /// Creates an empty accumulator.
    pub fn new(
        feature: Feature,
        max_count: usize,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            feature,
            max_count: max_count.max(1),
            max_age,
            items: Vec::new(),
            oldest: None,
            clock,
        }
    }

    /// Buffers a payload, starting the age timer if the buffer was empty.
    pub fn add(&mut self, payload: Payload) {
        if self.items.is_empty() {
            self.oldest = Some(self.clock.now());
        }
        self.items.push(payload);
    }

    /// Whether either flush trigger has fired.
    pub fn should_flush(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        self.items.len() >= self.max_count || self.age().is_some_and(|age| age >= self.max_age)
    }

    /// Age of the oldest buffered payload.
    pub fn age(&self) -> Option<Duration> {
        self.oldest.map(|oldest| self.clock.now().saturating_duration_since(oldest))
    }

    /// Time left before the age trigger fires, if anything is buffered.
    pub fn time_until_due(&self) -> Option<Duration> {
        self.age().map(|age| self.max_age.saturating_sub(age))
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Seals the buffered payloads into a batch and starts a fresh buffer.
    pub fn drain_and_reset(&mut self) -> Batch {
        let items = std::mem::take(&mut self.items);
        self.oldest = None;
        let sealed_at = DateTime::<Utc>::from(self.clock.now_system());
        Batch::seal(self.feature, items, sealed_at)
    }

    /// Discards buffered payloads. Returns how many were discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        self.oldest = None;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use outpost_core::TestClock;
    use proptest::prelude::*;

    use super::*;

    fn accumulator(max_count: usize, max_age_ms: u64) -> (BatchAccumulator, TestClock) {
        let clock = TestClock::new();
        let acc = BatchAccumulator::new(
            Feature::Events,
            max_count,
            Duration::from_millis(max_age_ms),
            Arc::new(clock.clone()),
        );
        (acc, clock)
    }

    fn payload(n: u8) -> Payload {
        Payload::new(Feature::Events, vec![n])
    }

    #[test]
    fn empty_never_flushes() {
        let (acc, clock) = accumulator(1, 0);
        clock.advance(Duration::from_secs(60));
        assert!(!acc.should_flush());
        assert_eq!(acc.time_until_due(), None);
    }

    #[test]
    fn size_trigger_fires_at_max_count() {
        let (mut acc, _clock) = accumulator(3, 60_000);
        acc.add(payload(1));
        acc.add(payload(2));
        assert!(!acc.should_flush());

        acc.add(payload(3));
        assert!(acc.should_flush());
    }

    #[test]
    fn age_trigger_fires_after_max_age() {
        let (mut acc, clock) = accumulator(200, 100);
        acc.add(payload(1));
        assert!(!acc.should_flush());
        assert_eq!(acc.time_until_due(), Some(Duration::from_millis(100)));

        clock.advance(Duration::from_millis(60));
        assert!(!acc.should_flush());
        assert_eq!(acc.time_until_due(), Some(Duration::from_millis(40)));

        clock.advance(Duration::from_millis(40));
        assert!(acc.should_flush());
        assert_eq!(acc.time_until_due(), Some(Duration::ZERO));
    }

    #[test]
    fn age_is_measured_from_oldest_item() {
        let (mut acc, clock) = accumulator(200, 100);
        acc.add(payload(1));
        clock.advance(Duration::from_millis(90));
        acc.add(payload(2));
        clock.advance(Duration::from_millis(10));

        assert!(acc.should_flush());
    }

    #[test]
    fn drain_resets_buffer_and_timer() {
        let (mut acc, clock) = accumulator(10, 100);
        acc.add(payload(1));
        acc.add(payload(2));
        clock.advance(Duration::from_millis(500));

        let batch = acc.drain_and_reset();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.feature(), Feature::Events);
        assert!(acc.is_empty());
        assert_eq!(acc.age(), None);

        acc.add(payload(3));
        assert!(!acc.should_flush());
    }

    #[test]
    fn discard_drops_everything() {
        let (mut acc, _clock) = accumulator(10, 100);
        acc.add(payload(1));
        assert_eq!(acc.discard(), 1);
        assert!(acc.is_empty());
    }

    proptest! {
        #[test]
        fn drained_batches_preserve_order(
            bodies in prop::collection::vec(any::<u8>(), 1..64),
            max in 1usize..16,
        ) {
            let (mut acc, _clock) = accumulator(max, 60_000);
            let mut delivered = Vec::new();
            for body in &bodies {
                acc.add(payload(*body));
                if acc.should_flush() {
                    let batch = acc.drain_and_reset();
                    prop_assert!(batch.len() <= max);
                    delivered.extend(batch.iter().map(|p| p.body()[0]));
                }
            }
            delivered.extend(acc.drain_and_reset().iter().map(|p| p.body()[0]));
            prop_assert_eq!(delivered, bodies);
        }
    }
}
