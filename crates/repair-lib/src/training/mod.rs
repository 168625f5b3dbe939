//! Model training, publication and persistence of learned state

mod history;
mod persistence;
mod scheduler;

pub use history::{HistoryFile, RepairHistory, DEFAULT_HISTORY_RETENTION};
pub use persistence::{
    ArtifactEntry, LoadedState, Manifest, ModelPersistence, PersistenceConfig, CLASSIFIER_FILE,
    DETECTOR_FILE, MANIFEST_FILE, Q_TABLE_FILE, SCALER_FILE,
};
pub(crate) use scheduler::format_version;
pub use scheduler::{
    train_models, Assessment, ModelGroup, ModelSlot, TrainingConfig, TrainingOutcome,
    TrainingScheduler, DEFAULT_RETRAIN_EVERY, DEFAULT_TRAINING_SEED, MIN_TRAINING_SAMPLES,
};
