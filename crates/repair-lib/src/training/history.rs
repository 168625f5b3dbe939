//! Audit log of repairs and observed failures

use super::persistence::write_atomic;
use crate::error::PersistenceError;
use crate::models::{FailureEvent, RepairAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Newest entries kept per list
pub const DEFAULT_HISTORY_RETENTION: usize = 1000;

/// On-disk form of the history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryFile {
    pub failures: Vec<FailureEvent>,
    #[serde(default)]
    pub repairs: Vec<RepairAction>,
    pub last_updated: DateTime<Utc>,
}

/// Retention-bounded record of failures and repair actions
#[derive(Debug, Clone)]
pub struct RepairHistory {
    failures: VecDeque<FailureEvent>,
    repairs: VecDeque<RepairAction>,
    retention: usize,
}

impl Default for RepairHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_RETENTION)
    }
}

impl RepairHistory {
    pub fn new(retention: usize) -> Self {
        Self {
            failures: VecDeque::new(),
            repairs: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    pub fn record_failure(&mut self, event: FailureEvent) {
        self.failures.push_back(event);
        while self.failures.len() > self.retention {
            self.failures.pop_front();
        }
    }

    pub fn record_repair(&mut self, action: RepairAction) {
        self.repairs.push_back(action);
        while self.repairs.len() > self.retention {
            self.repairs.pop_front();
        }
    }

    /// Oldest first
    pub fn failures(&self) -> impl DoubleEndedIterator<Item = &FailureEvent> {
        self.failures.iter()
    }

    /// Oldest first
    pub fn repairs(&self) -> impl DoubleEndedIterator<Item = &RepairAction> {
        self.repairs.iter()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn repair_count(&self) -> usize {
        self.repairs.len()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn to_file(&self) -> HistoryFile {
        HistoryFile {
            failures: self.failures.iter().cloned().collect(),
            repairs: self.repairs.iter().cloned().collect(),
            last_updated: Utc::now(),
        }
    }

    /// Build from a file, keeping only the newest `retention` entries
    pub fn from_file(file: HistoryFile, retention: usize) -> Self {
        let mut history = Self::new(retention);
        file.failures
            .into_iter()
            .for_each(|f| history.record_failure(f));
        file.repairs
            .into_iter()
            .for_each(|r| history.record_repair(r));
        history
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let bytes = serde_json::to_vec_pretty(&self.to_file()).map_err(|source| {
            PersistenceError::Serde {
                artifact: "history".to_string(),
                source,
            }
        })?;
        write_atomic(path, &bytes)?;
        debug!(
            path = %path.display(),
            failures = self.failures.len(),
            repairs = self.repairs.len(),
            "Saved repair history"
        );
        Ok(())
    }

    /// Read a history file as written by `save`
    pub fn read_file(path: &Path) -> Result<HistoryFile, PersistenceError> {
        let bytes = fs::read(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            artifact: "history".to_string(),
            source,
        })
    }

    /// Load, or start empty if the file is absent or unreadable
    pub fn load_or_empty(path: &Path, retention: usize) -> Self {
        if !path.exists() {
            return Self::new(retention);
        }
        match Self::read_file(path) {
            Ok(file) => Self::from_file(file, retention),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "History unreadable, starting empty");
                Self::new(retention)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, FailureKind, MetricSnapshot, RepairTrigger};
    use tempfile::TempDir;

    fn failure(ts: i64) -> FailureEvent {
        FailureEvent {
            timestamp: ts,
            service_id: "api".to_string(),
            kind: FailureKind::Unhealthy,
            restart_count: 0,
        }
    }

    fn repair(ts: i64) -> RepairAction {
        RepairAction {
            timestamp: ts,
            service_id: "api".to_string(),
            action: Action::Restart,
            trigger: RepairTrigger::PredictedFailure,
            metrics_before: MetricSnapshot::unavailable("api", ts),
            metrics_after: None,
            success: true,
            reward: 0.0,
        }
    }

    #[test]
    fn test_retention_keeps_newest() {
        let mut history = RepairHistory::new(3);
        for ts in 0..5 {
            history.record_failure(failure(ts));
            history.record_repair(repair(ts));
        }
        let kept: Vec<i64> = history.failures().map(|f| f.timestamp).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(history.repair_count(), 3);
        assert_eq!(history.repairs().next().map(|r| r.timestamp), Some(2));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("repair_history.json");

        let mut history = RepairHistory::default();
        history.record_failure(failure(10));
        history.record_repair(repair(11));
        history.save(&path).unwrap();

        let loaded = RepairHistory::load_or_empty(&path, DEFAULT_HISTORY_RETENTION);
        assert_eq!(loaded.failure_count(), 1);
        assert_eq!(loaded.repair_count(), 1);
    }

    #[test]
    fn test_load_caps_oversized_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repair_history.json");
        let file = HistoryFile {
            failures: (0..1500).map(failure).collect(),
            repairs: Vec::new(),
            last_updated: Utc::now(),
        };
        fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        let loaded = RepairHistory::load_or_empty(&path, DEFAULT_HISTORY_RETENTION);
        assert_eq!(loaded.failure_count(), 1000);
        assert_eq!(loaded.failures().next().map(|f| f.timestamp), Some(500));
    }

    #[test]
    fn test_failures_only_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repair_history.json");
        fs::write(
            &path,
            r#"{"failures":[{"timestamp":1,"service_id":"db","kind":"down","restart_count":2}],"last_updated":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let loaded = RepairHistory::load_or_empty(&path, 10);
        assert_eq!(loaded.failure_count(), 1);
        assert_eq!(loaded.repair_count(), 0);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repair_history.json");
        fs::write(&path, b"{").unwrap();
        let loaded = RepairHistory::load_or_empty(&path, 10);
        assert_eq!(loaded.failure_count(), 0);
    }
}
