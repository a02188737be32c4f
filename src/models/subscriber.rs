use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::SubscriberConfig;
use crate::utils::error::{AppError, Result};

/// A chat that receives notifications for the targets it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscriber {
    pub id: String,
    pub chat_id: String,
    pub name: Option<String>,
    pub targets: BTreeSet<String>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            name: None,
            targets: BTreeSet::new(),
        }
    }
}

impl From<&SubscriberConfig> for Subscriber {
    fn from(config: &SubscriberConfig) -> Self {
        Self {
            id: config.id.clone(),
            chat_id: config.chat_id.clone(),
            name: config.name.clone(),
            targets: config.targets.iter().cloned().collect(),
        }
    }
}

/// Subscribers own their target ids. `by_target` is derived from them and
/// only answers "who watches this target".
#[derive(Debug, Clone, Default)]
pub struct SubscriberDirectory {
    subscribers: HashMap<String, Subscriber>,
    by_target: HashMap<String, BTreeSet<String>>,
}

impl SubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[SubscriberConfig]) -> Self {
        let mut directory = Self::new();
        for config in configs {
            directory.insert(Subscriber::from(config));
        }
        directory
    }

    /// Adds or replaces a subscriber.
    pub fn insert(&mut self, subscriber: Subscriber) {
        self.remove(&subscriber.id);
        for target_id in &subscriber.targets {
            self.index(target_id, &subscriber.id);
        }
        self.subscribers.insert(subscriber.id.clone(), subscriber);
    }

    pub fn remove(&mut self, subscriber_id: &str) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(subscriber_id)?;
        for target_id in &subscriber.targets {
            self.unindex(target_id, subscriber_id);
        }
        Some(subscriber)
    }

    /// Returns `false` when the subscriber already watched the target.
    pub fn subscribe(&mut self, subscriber_id: &str, target_id: &str) -> Result<bool> {
        let subscriber = self
            .subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| AppError::NotFound {
                resource: format!("subscriber {}", subscriber_id),
            })?;

        if !subscriber.targets.insert(target_id.to_string()) {
            return Ok(false);
        }
        self.index(target_id, subscriber_id);
        Ok(true)
    }

    pub fn unsubscribe(&mut self, subscriber_id: &str, target_id: &str) -> Result<bool> {
        let subscriber = self
            .subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| AppError::NotFound {
                resource: format!("subscriber {}", subscriber_id),
            })?;

        if !subscriber.targets.remove(target_id) {
            return Ok(false);
        }
        self.unindex(target_id, subscriber_id);
        Ok(true)
    }

    pub fn get(&self, subscriber_id: &str) -> Option<&Subscriber> {
        self.subscribers.get(subscriber_id)
    }

    pub fn subscribers_of(&self, target_id: &str) -> Vec<&Subscriber> {
        self.by_target
            .get(target_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.subscribers.get(id))
            .collect()
    }

    pub fn chat_ids_for(&self, target_id: &str) -> Vec<String> {
        self.subscribers_of(target_id)
            .into_iter()
            .map(|s| s.chat_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn index(&mut self, target_id: &str, subscriber_id: &str) {
        self.by_target
            .entry(target_id.to_string())
            .or_default()
            .insert(subscriber_id.to_string());
    }

    fn unindex(&mut self, target_id: &str, subscriber_id: &str) {
        if let Some(ids) = self.by_target.get_mut(target_id) {
            ids.remove(subscriber_id);
            if ids.is_empty() {
                self.by_target.remove(target_id);
            }
        }
    }
}
