//! Persistence layer for targets and their status between engine calls

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteTargetStore;

use crate::core::{Phase, Target};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;

/// One stored target as shown by `list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub kind: String,
    pub name: String,
    pub phase: Phase,
    /// Conditions that are True out of those recorded
    pub completed_steps: usize,
    pub recorded_steps: usize,
    pub updated_at: DateTime<Utc>,
}

impl TargetSummary {
    pub fn of<T: Target>(target: &T, updated_at: DateTime<Utc>) -> Self {
        let status = target.status();
        Self {
            kind: T::KIND.to_string(),
            name: target.name().to_string(),
            phase: status.phase,
            completed_steps: status
                .conditions
                .iter()
                .filter(|c| c.status == crate::core::ConditionStatus::True)
                .count(),
            recorded_steps: status.conditions.len(),
            updated_at,
        }
    }
}

/// Trait for target storage backends
///
/// The whole target is stored, status included, so a driver can pick up
/// where a previous process stopped.
#[async_trait::async_trait]
pub trait TargetStore<T: Target>: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<T>>;

    /// Insert or replace the target
    async fn save(&self, target: &T) -> Result<()>;

    /// Remove the target; removing a missing one is not an error
    async fn delete(&self, name: &str) -> Result<()>;

    /// Summaries of every stored target of this kind, sorted by name
    async fn list(&self) -> Result<Vec<TargetSummary>>;
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryStore<T: Target> {
    targets: tokio::sync::RwLock<HashMap<String, (T, DateTime<Utc>)>>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Target> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            targets: tokio::sync::RwLock::new(HashMap::new()),
            _kind: PhantomData,
        }
    }
}

impl<T: Target> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T: Target> TargetStore<T> for InMemoryStore<T> {
    async fn load(&self, name: &str) -> Result<Option<T>> {
        let targets = self.targets.read().await;
        Ok(targets.get(name).map(|(t, _)| t.clone()))
    }

    async fn save(&self, target: &T) -> Result<()> {
        let mut targets = self.targets.write().await;
        targets.insert(target.name().to_string(), (target.clone(), Utc::now()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.targets.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TargetSummary>> {
        let targets = self.targets.read().await;
        let mut summaries: Vec<_> = targets
            .values()
            .map(|(t, at)| TargetSummary::of(t, *at))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cluster, Condition, ConditionStatus};

    #[tokio::test]
    async fn test_in_memory_store() {
        let store: InMemoryStore<Cluster> = InMemoryStore::new();
        let mut cluster = Cluster::new("beta");
        cluster.status.conditions.push(Condition::new("a", ConditionStatus::True, "", ""));
        cluster.status.conditions.push(Condition::waiting("b"));
        store.save(&cluster).await.unwrap();
        store.save(&Cluster::new("alpha")).await.unwrap();

        let loaded = store.load("beta").await.unwrap().unwrap();
        assert_eq!(loaded, cluster);

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "alpha");
        assert_eq!(list[1].completed_steps, 1);
        assert_eq!(list[1].recorded_steps, 2);
        assert_eq!(list[1].kind, "cluster");

        store.delete("beta").await.unwrap();
        store.delete("beta").await.unwrap();
        assert!(store.load("beta").await.unwrap().is_none());
    }
}
