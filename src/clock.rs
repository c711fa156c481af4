//! Monotonic clock source for presence-event timestamps
//!
//! Provides wall-clock milliseconds that never go backward, so that the
//! per-user event ordering on the bus is reflected in timestamps even
//! across NTP adjustments on a single node.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that guarantees monotonically increasing millisecond
/// timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    /// High-water mark: the largest timestamp we've ever returned (millis)
    high_water_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            high_water_ms: AtomicI64::new(0),
        }
    }

    /// Returns a monotonically increasing unix-millisecond timestamp.
    ///
    /// If the wall clock has gone backward (e.g. NTP adjustment), returns
    /// the previous high-water mark + 1ms instead.
    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        loop {
            let prev = self.high_water_ms.load(Ordering::Acquire);
            let ts = wall.max(prev + 1);
            match self.high_water_ms.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue, // CAS failed, retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = 0i64;
        for _ in 0..100 {
            let ts = clock.now_millis();
            assert!(ts > prev, "timestamps must be strictly increasing");
            prev = ts;
        }
    }

    #[test]
    fn test_reasonable_wall_time() {
        let clock = MonotonicClock::new();
        // Should be after 2020-01-01 in unix millis
        assert!(clock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_concurrent_monotonicity() {
        use std::sync::Arc;
        let clock = Arc::new(MonotonicClock::new());
        let mut handles = vec![];

        for _ in 0..4 {
            let c = clock.clone();
            handles.push(std::thread::spawn(move || {
                let mut prev = 0i64;
                for _ in 0..1000 {
                    let ts = c.now_millis();
                    assert!(ts > prev);
                    prev = ts;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
