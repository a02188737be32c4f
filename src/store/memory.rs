use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::TargetStore;
use crate::models::MonitoredTarget;
use crate::utils::error::{AppError, Result};

/// In-process store for `check` runs, tests and deployments without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    targets: RwLock<BTreeMap<String, MonitoredTarget>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: impl IntoIterator<Item = MonitoredTarget>) -> Self {
        Self {
            targets: RwLock::new(targets.into_iter().map(|t| (t.id.clone(), t)).collect()),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save_target_state` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn load_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let targets = self.targets.read().await;
        Ok(targets.values().cloned().collect())
    }

    async fn save_target_state(&self, target: &MonitoredTarget) -> Result<()> {
        let mut targets = self.targets.write().await;
        let stored = targets.get_mut(&target.id).ok_or_else(|| AppError::NotFound {
            resource: format!("target {}", target.id),
        })?;
        *stored = target.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_target(&self, target: &MonitoredTarget) -> Result<MonitoredTarget> {
        let mut targets = self.targets.write().await;
        let stored = targets
            .entry(target.id.clone())
            .and_modify(|stored| stored.reconfigure(target))
            .or_insert_with(|| target.clone());
        Ok(stored.clone())
    }

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>> {
        let targets = self.targets.read().await;
        Ok(targets.get(id).cloned())
    }
}
