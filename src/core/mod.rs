pub mod diff;
pub mod hasher;
pub mod retry;
pub mod stats;

pub use diff::{Confidence, DiffDetector, DiffResult, NotifyPolicy};
pub use hasher::{ContentHasher, Fingerprint};
pub use retry::{RetryPolicy, RetryState};
pub use stats::{CycleStatistics, StatisticsTracker};
