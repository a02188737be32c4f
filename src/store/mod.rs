use async_trait::async_trait;

use crate::models::MonitoredTarget;
use crate::utils::error::Result;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable home of target definitions and their last known state.
///
/// The scheduler saves after every cycle and tolerates a lost save: the check
/// simply runs again, and a repeated identical fingerprint notifies nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Every stored target, enabled or not.
    async fn load_targets(&self) -> Result<Vec<MonitoredTarget>>;

    /// Persists fingerprint, timestamps and counters of a known target.
    async fn save_target_state(&self, target: &MonitoredTarget) -> Result<()>;

    /// Inserts a new target or applies a changed definition to a stored one,
    /// returning the stored result.
    async fn upsert_target(&self, target: &MonitoredTarget) -> Result<MonitoredTarget>;

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>>;
}
