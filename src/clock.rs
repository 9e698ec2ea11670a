use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use chrono::Utc;

use crate::types::from_micros;
use crate::types::Timestamp;

/// Wall clock at microsecond resolution which never hands out the same value twice.
///
/// Two mutations stamped by the same process are always ordered, so a watermark comparison with `>` can't lose one of
/// them to a shared tick.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return from_micros(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev, "{next} must be after {prev}");
            prev = next;
        }
    }

    #[test]
    fn unique_across_threads() {
        let clock = Arc::new(MonotonicClock::new());
        let handles = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1_000).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }
        assert_eq!(seen.len(), 4_000);
    }
}
