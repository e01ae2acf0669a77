use std::time::Duration;

use tokio::time::Instant;

/// A monotonic countdown bounding the total time of one top-level call.
#[derive(Clone, Copy, Debug)]
pub struct TimeBudget {
    started: Instant,
    total: Duration,
}

impl TimeBudget {
    pub fn start_new(total: Duration) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }

    pub fn infinite() -> Self {
        Self::start_new(Duration::MAX)
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    pub fn has_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn is_infinite(&self) -> bool {
        self.total == Duration::MAX
    }
}
