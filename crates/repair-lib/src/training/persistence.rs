//! Saving and restoring learned state
//!
//! The model group and Q-table are written as one unit: every artifact goes
//! to a temp file that is fsynced and renamed into place, and the manifest
//! written last records the SHA-256 of each artifact. Loading verifies every
//! checksum; anything missing, mismatched or unparsable means the whole unit
//! is discarded.

use super::scheduler::ModelGroup;
use crate::anomaly::AnomalyDetector;
use crate::error::PersistenceError;
use crate::policy::QTable;
use crate::predictor::{FailureClassifier, FeatureScaler};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SCALER_FILE: &str = "scaler.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const DETECTOR_FILE: &str = "detector.json";
pub const Q_TABLE_FILE: &str = "q_table.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Where learned state lives on disk
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory holding the model artifacts and manifest
    pub model_dir: PathBuf,
    /// Repair and failure history file
    pub history_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("/var/lib/repair-agent/models"),
            history_path: PathBuf::from("/var/lib/repair-agent/repair_history.json"),
        }
    }
}

/// Checksum and size of one saved artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub sha256: String,
    pub size_bytes: usize,
}

/// Index of the last complete save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Published model version at save time; `None` if no model existed
    pub model_version: Option<u64>,
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub training_samples: usize,
    #[serde(default)]
    pub positive_labels: usize,
    pub saved_at: DateTime<Utc>,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

/// Learned state restored from disk
#[derive(Debug, Default)]
pub struct LoadedState {
    pub models: Option<ModelGroup>,
    pub q_table: QTable,
}

/// Reads and writes the model directory
#[derive(Debug, Clone)]
pub struct ModelPersistence {
    model_dir: PathBuf,
}

impl ModelPersistence {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Save the model group (if any) and Q-table, manifest last
    pub fn save(
        &self,
        models: Option<&ModelGroup>,
        q_table: &QTable,
    ) -> Result<Manifest, PersistenceError> {
        fs::create_dir_all(&self.model_dir).map_err(io_error(&self.model_dir))?;

        let mut artifacts = BTreeMap::new();
        if let Some(group) = models {
            artifacts.insert(
                SCALER_FILE.to_string(),
                self.write_artifact(SCALER_FILE, &group.scaler)?,
            );
            artifacts.insert(
                CLASSIFIER_FILE.to_string(),
                self.write_artifact(CLASSIFIER_FILE, &group.classifier)?,
            );
            artifacts.insert(
                DETECTOR_FILE.to_string(),
                self.write_artifact(DETECTOR_FILE, &group.detector)?,
            );
        }
        artifacts.insert(
            Q_TABLE_FILE.to_string(),
            self.write_artifact(Q_TABLE_FILE, q_table)?,
        );

        let manifest = Manifest {
            model_version: models.map(|g| g.version),
            trained_at: models.map(|g| g.trained_at),
            training_samples: models.map(|g| g.training_samples).unwrap_or(0),
            positive_labels: models.map(|g| g.positive_labels).unwrap_or(0),
            saved_at: Utc::now(),
            artifacts,
        };
        let bytes = to_json(MANIFEST_FILE, &manifest)?;
        write_atomic(&self.model_dir.join(MANIFEST_FILE), &bytes)?;

        info!(
            dir = %self.model_dir.display(),
            model_version = ?manifest.model_version,
            q_entries = q_table.len(),
            "Saved learned state"
        );
        Ok(manifest)
    }

    /// Read the manifest without verifying artifacts
    pub fn read_manifest(&self) -> Result<Option<Manifest>, PersistenceError> {
        let path = self.model_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = read_file(&path)?;
        let manifest = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            artifact: MANIFEST_FILE.to_string(),
            source,
        })?;
        Ok(Some(manifest))
    }

    /// Load and verify the whole unit. A directory without a manifest is a
    /// fresh start, not an error.
    pub fn load(&self) -> Result<LoadedState, PersistenceError> {
        let Some(manifest) = self.read_manifest()? else {
            debug!(dir = %self.model_dir.display(), "No saved state found");
            return Ok(LoadedState::default());
        };

        let q_table: QTable = self.read_artifact(&manifest, Q_TABLE_FILE)?;

        let models = match manifest.model_version {
            Some(version) => {
                let scaler: FeatureScaler = self.read_artifact(&manifest, SCALER_FILE)?;
                let classifier: FailureClassifier =
                    self.read_artifact(&manifest, CLASSIFIER_FILE)?;
                let detector: AnomalyDetector = self.read_artifact(&manifest, DETECTOR_FILE)?;
                Some(ModelGroup {
                    scaler,
                    classifier,
                    detector,
                    version,
                    trained_at: manifest.trained_at.unwrap_or(manifest.saved_at),
                    training_samples: manifest.training_samples,
                    positive_labels: manifest.positive_labels,
                })
            }
            None => None,
        };

        info!(
            dir = %self.model_dir.display(),
            model_version = ?manifest.model_version,
            q_entries = q_table.len(),
            "Loaded learned state"
        );
        Ok(LoadedState { models, q_table })
    }

    /// Load, falling back to empty state on any error
    pub fn load_or_empty(&self) -> LoadedState {
        match self.load() {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    dir = %self.model_dir.display(),
                    error = %e,
                    "Saved state unusable, starting without models"
                );
                LoadedState::default()
            }
        }
    }

    fn write_artifact<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<ArtifactEntry, PersistenceError> {
        let bytes = to_json(name, value)?;
        write_atomic(&self.model_dir.join(name), &bytes)?;
        Ok(ArtifactEntry {
            sha256: compute_checksum(&bytes),
            size_bytes: bytes.len(),
        })
    }

    fn read_artifact<T: DeserializeOwned>(
        &self,
        manifest: &Manifest,
        name: &str,
    ) -> Result<T, PersistenceError> {
        let entry = manifest
            .artifacts
            .get(name)
            .ok_or_else(|| PersistenceError::IncompleteManifest(format!("{} not listed", name)))?;

        let path = self.model_dir.join(name);
        if !path.exists() {
            return Err(PersistenceError::MissingArtifact(name.to_string()));
        }
        let bytes = read_file(&path)?;

        let actual = compute_checksum(&bytes);
        if actual != entry.sha256 {
            return Err(PersistenceError::ChecksumMismatch {
                artifact: name.to_string(),
                expected: entry.sha256.clone(),
                actual,
            });
        }

        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            artifact: name.to_string(),
            source,
        })
    }
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serde {
        artifact: name.to_string(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    fs::read(path).map_err(io_error(path))
}

/// Write via a synced temp file and rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(io_error(&temp_path))?;
    file.write_all(bytes).map_err(io_error(&temp_path))?;
    file.sync_all().map_err(io_error(&temp_path))?;
    fs::rename(&temp_path, path).map_err(io_error(path))?;
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError {
    let path = path.to_path_buf();
    move |source| PersistenceError::Io { path, source }
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
