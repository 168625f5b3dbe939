//! Owned learned state and its load/flush lifecycle

use crate::error::{PersistenceError, PolicyError};
use crate::policy::{PolicyConfig, PolicyEngine};
use crate::store::{MetricsStore, StoreConfig};
use crate::training::{
    ModelPersistence, ModelSlot, PersistenceConfig, RepairHistory, DEFAULT_HISTORY_RETENTION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Everything the control loop reads and mutates between ticks
#[derive(Debug)]
pub struct EngineState {
    store: MetricsStore,
    models: Arc<ModelSlot>,
    policy: PolicyEngine,
    history: RepairHistory,
    persistence: ModelPersistence,
    history_path: PathBuf,
}

impl EngineState {
    /// Fresh state with nothing learned yet
    pub fn new(
        store_config: &StoreConfig,
        policy_config: &PolicyConfig,
        persistence_config: &PersistenceConfig,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            store: MetricsStore::with_config(store_config),
            models: Arc::new(ModelSlot::new()),
            policy: PolicyEngine::new(policy_config)?,
            history: RepairHistory::new(DEFAULT_HISTORY_RETENTION),
            persistence: ModelPersistence::new(persistence_config.model_dir.clone()),
            history_path: persistence_config.history_path.clone(),
        })
    }

    /// Restore models, Q-table and history from disk.
    ///
    /// Unusable saved state is logged and replaced by empty state; only
    /// invalid policy parameters are an error.
    pub fn load(
        store_config: &StoreConfig,
        policy_config: &PolicyConfig,
        persistence_config: &PersistenceConfig,
    ) -> Result<Self, PolicyError> {
        let mut state = Self::new(store_config, policy_config, persistence_config)?;

        let loaded = state.persistence.load_or_empty();
        if let Some(group) = loaded.models {
            state.models.publish(group);
        }
        state.policy.replace_q_table(loaded.q_table);
        state.history = RepairHistory::load_or_empty(&state.history_path, DEFAULT_HISTORY_RETENTION);

        info!(
            model_version = state.models.version(),
            q_entries = state.policy.len(),
            failures = state.history.failure_count(),
            repairs = state.history.repair_count(),
            "Engine state loaded"
        );
        Ok(state)
    }

    /// Write models, Q-table and history. Both writes are attempted; the
    /// first error is returned.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let models = self.models.load();
        let saved = self
            .persistence
            .save(models.as_deref(), self.policy.q_table())
            .map(|_| ());
        let history = self.history.save(&self.history_path);
        saved.and(history)
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MetricsStore {
        &mut self.store
    }

    /// Shared handle to the model slot
    pub fn models(&self) -> &Arc<ModelSlot> {
        &self.models
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PolicyEngine {
        &mut self.policy
    }

    pub fn history(&self) -> &RepairHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut RepairHistory {
        &mut self.history
    }

    pub fn model_dir(&self) -> &Path {
        self.persistence.model_dir()
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, FailureEvent, FailureKind};
    use crate::policy::{DiscretizedState, HealthBucket, UsageLevel};
    use tempfile::TempDir;

    fn persistence_config(dir: &TempDir) -> PersistenceConfig {
        PersistenceConfig {
            model_dir: dir.path().join("models"),
            history_path: dir.path().join("repair_history.json"),
        }
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = PolicyConfig {
            epsilon: -0.1,
            ..Default::default()
        };
        assert!(EngineState::new(&StoreConfig::default(), &policy, &persistence_config(&dir)).is_err());
    }

    #[test]
    fn test_flush_then_load_restores_learning() {
        let dir = TempDir::new().unwrap();
        let config = persistence_config(&dir);
        let state_key =
            DiscretizedState::new("api", UsageLevel::High, UsageLevel::High, HealthBucket::Unhealthy);

        let mut state =
            EngineState::new(&StoreConfig::default(), &PolicyConfig::default(), &config).unwrap();
        state.policy_mut().update_q_value(&state_key, Action::ScaleUp, 10.0);
        state.history_mut().record_failure(FailureEvent {
            timestamp: 5,
            service_id: "api".to_string(),
            kind: FailureKind::Down,
            restart_count: 0,
        });
        state.flush().unwrap();

        let restored =
            EngineState::load(&StoreConfig::default(), &PolicyConfig::default(), &config).unwrap();
        assert!((restored.policy().q_value(&state_key, Action::ScaleUp) - 1.0).abs() < 1e-12);
        assert_eq!(restored.history().failure_count(), 1);
        assert!(!restored.models().is_trained());
        assert!(restored.store().is_empty());
    }

    #[test]
    fn test_load_from_empty_directory() {
        let dir = TempDir::new().unwrap();
        let state = EngineState::load(
            &StoreConfig::default(),
            &PolicyConfig::default(),
            &persistence_config(&dir),
        )
        .unwrap();
        assert!(state.policy().is_empty());
        assert_eq!(state.history().repair_count(), 0);
    }
}
