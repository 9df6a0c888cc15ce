use std::sync::atomic::{AtomicI64, Ordering};

/// Issues strictly increasing logical timestamps based on wall-clock milliseconds.
///
/// Two saves in the same millisecond still get distinct, ordered stamps, so
/// "most recent" is a total order within one backend.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock at or after `floor` (e.g. the newest stamp already stored).
    pub fn starting_at(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// Returns the next stamp.
    pub fn tick(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Raises the floor so later ticks are greater than `stamp`.
    pub fn observe(&self, stamp: i64) {
        self.last.fetch_max(stamp, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_strictly_increase() {
        let clock = LogicalClock::new();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_observe_raises_floor() {
        let far_future = chrono::Utc::now().timestamp_millis() + 1_000_000;
        let clock = LogicalClock::new();
        clock.observe(far_future);
        assert_eq!(clock.tick(), far_future + 1);
    }
}
