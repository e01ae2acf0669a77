//! Load-shedding modules fed by per-minute sliding-window statistics.
//!
//! Registries own the statistics and are keyed by storage key, so several clients
//! talking to the same service can share one view of its health by sharing a
//! registry.

mod budgeting;
mod counter;
mod throttling;

pub use budgeting::{
    BudgetMetrics, ReplicaBudgetingModule, ReplicaBudgetingOptions, ReplicaBudgetingRegistry,
};
pub use counter::{SlidingWindowCounter, WindowTotals};
pub use throttling::{
    AdaptiveThrottlingModule, AdaptiveThrottlingOptions, AdaptiveThrottlingRegistry,
    ThrottlingMetrics,
};
