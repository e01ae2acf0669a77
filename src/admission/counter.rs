use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::time::Instant;

const EMPTY: u64 = u64::MAX;

#[derive(Debug)]
struct Bucket {
    minute: u64,
    requests: AtomicU64,
    outcomes: AtomicU64,
}

impl Bucket {
    fn new(minute: u64) -> Self {
        Self {
            minute,
            requests: AtomicU64::new(0),
            outcomes: AtomicU64::new(0),
        }
    }
}

/// Sums of one counter's live buckets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub requests: u64,
    /// Accepted responses for throttling, replica attempts for budgeting.
    pub outcomes: u64,
}

/// Request/outcome tallies over the last `minutes` whole minutes.
///
/// One bucket per minute in a ring. A writer that finds a slot holding an older minute
/// swaps in a fresh bucket with a single compare-and-swap; a concurrent writer that loses
/// the race reloads the slot. Totals are eventually consistent: an increment racing
/// with a minute rollover may land in the bucket being replaced.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    buckets: Box<[ArcSwap<Bucket>]>,
    epoch: Instant,
}

impl SlidingWindowCounter {
    pub fn new(minutes: usize) -> Self {
        let buckets = (0..minutes.max(1))
            .map(|_| ArcSwap::from_pointee(Bucket::new(EMPTY)))
            .collect();
        Self {
            buckets,
            epoch: Instant::now(),
        }
    }

    pub fn minutes(&self) -> usize {
        self.buckets.len()
    }

    /// Whole minutes elapsed since the counter was created.
    pub fn current_minute(&self) -> u64 {
        self.epoch.elapsed().as_secs() / 60
    }

    pub fn add(&self, requests: u64, outcomes: u64) {
        self.add_at(self.current_minute(), requests, outcomes);
    }

    pub fn add_at(&self, minute: u64, requests: u64, outcomes: u64) {
        let Some(bucket) = self.bucket_for(minute) else {
            return;
        };
        if requests > 0 {
            bucket.requests.fetch_add(requests, Ordering::Relaxed);
        }
        if outcomes > 0 {
            bucket.outcomes.fetch_add(outcomes, Ordering::Relaxed);
        }
    }

    pub fn totals(&self) -> WindowTotals {
        self.totals_at(self.current_minute())
    }

    /// Sums the buckets of `minute` and the `minutes - 1` minutes before it.
    pub fn totals_at(&self, minute: u64) -> WindowTotals {
        let window = self.buckets.len() as u64;
        let mut totals = WindowTotals::default();
        for slot in self.buckets.iter() {
            let bucket = slot.load();
            if bucket.minute == EMPTY || bucket.minute > minute || minute - bucket.minute >= window
            {
                continue;
            }
            totals.requests += bucket.requests.load(Ordering::Relaxed);
            totals.outcomes += bucket.outcomes.load(Ordering::Relaxed);
        }
        totals
    }

    pub fn clear(&self) {
        for slot in self.buckets.iter() {
            slot.store(Arc::new(Bucket::new(EMPTY)));
        }
    }

    /// The bucket of `minute`, or `None` if its slot already moved on to a later minute.
    fn bucket_for(&self, minute: u64) -> Option<Arc<Bucket>> {
        let index = (minute % self.buckets.len() as u64) as usize;
        let slot = &self.buckets[index];
        loop {
            let current = slot.load_full();
            if current.minute == minute {
                return Some(current);
            }
            if current.minute != EMPTY && current.minute > minute {
                return None;
            }

            let fresh = Arc::new(Bucket::new(minute));
            let previous = slot.compare_and_swap(&current, fresh.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return Some(fresh);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn window_keeps_recent_minutes_only() {
        let counter = SlidingWindowCounter::new(2);
        counter.add_at(0, 5, 1);
        counter.add_at(1, 3, 2);

        assert_eq!(counter.totals_at(1), WindowTotals { requests: 8, outcomes: 3 });
        assert_eq!(counter.totals_at(2), WindowTotals { requests: 3, outcomes: 2 });

        // Minute 2 reuses minute 0's slot.
        counter.add_at(2, 1, 0);
        assert_eq!(counter.totals_at(2), WindowTotals { requests: 4, outcomes: 2 });
        assert_eq!(counter.totals_at(4), WindowTotals::default());
    }

    #[test]
    fn stale_writes_are_dropped() {
        let counter = SlidingWindowCounter::new(2);
        counter.add_at(3, 1, 1);
        counter.add_at(1, 10, 10);
        assert_eq!(counter.totals_at(3), WindowTotals { requests: 1, outcomes: 1 });
    }

    #[test]
    fn clear_resets_everything() {
        let counter = SlidingWindowCounter::new(3);
        counter.add_at(0, 4, 4);
        counter.clear();
        assert_eq!(counter.totals_at(0), WindowTotals::default());
    }

    #[test]
    fn concurrent_writers_lose_nothing_within_a_minute() {
        let counter = Arc::new(SlidingWindowCounter::new(2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.add_at(7, 1, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            counter.totals_at(7),
            WindowTotals { requests: 8000, outcomes: 8000 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn minutes_follow_the_clock() {
        let counter = SlidingWindowCounter::new(2);
        counter.add(1, 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        counter.add(1, 0);
        assert_eq!(counter.current_minute(), 1);
        assert_eq!(counter.totals().requests, 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(counter.totals().requests, 1);
    }
}
