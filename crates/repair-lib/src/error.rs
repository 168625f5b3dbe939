//! Error types for the repair engine
//!
//! None of these terminate the control loop; the loop logs them and moves
//! on to the next tick.

use std::path::PathBuf;
use thiserror::Error;

/// A snapshot was rejected before reaching the store
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is missing a service id")]
    MissingServiceId,

    #[error("field `{field}` is not a finite number")]
    NonFinite { field: &'static str },

    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Training could not produce a new model group
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient data: {have} snapshots, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("no labelable samples in the training window")]
    NoLabelableSamples,

    #[error("training features are degenerate: {0}")]
    DegenerateFeatures(String),

    #[error("training task failed: {0}")]
    TaskFailed(String),
}

/// Saving or restoring learned state failed
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {artifact}: {source}")]
    Serde {
        artifact: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {0} listed in manifest is missing")]
    MissingArtifact(String),

    #[error("checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("manifest is incomplete: {0}")]
    IncompleteManifest(String),
}

/// Invalid policy parameters
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("epsilon must be within [0, 1], got {0}")]
    InvalidEpsilon(f64),

    #[error("learning rate must be within (0, 1], got {0}")]
    InvalidLearningRate(f64),
}
