//! Model group training and publication
//!
//! The scaler, failure classifier and anomaly detector are always trained
//! from the same window and published together. Readers take an `Arc`
//! snapshot of the current group from the [`ModelSlot`], so a retrain never
//! exposes a partially updated model.

use crate::anomaly::{AnomalyDetector, IsolationParams};
use crate::error::TrainingError;
use crate::models::{FeatureVector, MetricSnapshot};
use crate::observability::RepairMetrics;
use crate::predictor::{
    label_window, FailureClassifier, FeatureExtractor, FeatureScaler, ForestParams,
    DEFAULT_HORIZON,
};
use crate::store::MetricsStore;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum stored snapshots before a model group is trained
pub const MIN_TRAINING_SAMPLES: usize = 100;

/// Ingested snapshots between retraining attempts
pub const DEFAULT_RETRAIN_EVERY: u64 = 100;

/// Base seed for training randomness
pub const DEFAULT_TRAINING_SEED: u64 = 42;

/// Configuration for model training
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub min_samples: usize,
    pub retrain_every: u64,
    /// Snapshots ahead inspected when labelling
    pub horizon: usize,
    pub forest: ForestParams,
    pub isolation: IsolationParams,
    /// Combined with the model version so every retrain is reproducible
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: MIN_TRAINING_SAMPLES,
            retrain_every: DEFAULT_RETRAIN_EVERY,
            horizon: DEFAULT_HORIZON,
            forest: ForestParams::default(),
            isolation: IsolationParams::default(),
            seed: DEFAULT_TRAINING_SEED,
        }
    }
}

/// Scores produced by a model group for one snapshot
#[derive(Debug, Clone, Copy)]
pub struct Assessment {
    pub probability: f64,
    pub anomaly_score: f64,
    pub anomalous: bool,
}

/// Scaler, classifier and detector trained from one window
#[derive(Debug, Clone)]
pub struct ModelGroup {
    pub scaler: FeatureScaler,
    pub classifier: FailureClassifier,
    pub detector: AnomalyDetector,
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub positive_labels: usize,
}

impl ModelGroup {
    /// Version label as reported in predictions, e.g. `v3`
    pub fn version_label(&self) -> String {
        format_version(self.version)
    }

    /// Score a snapshot with both models
    pub fn assess(&self, snapshot: &MetricSnapshot) -> Assessment {
        let scaled = self.scaler.transform(&FeatureExtractor::new().extract(snapshot));
        let anomaly_score = self.detector.score(&scaled);
        Assessment {
            probability: self.classifier.predict_proba(&scaled),
            anomaly_score,
            anomalous: anomaly_score > self.detector.threshold(),
        }
    }
}

pub(crate) fn format_version(version: u64) -> String {
    format!("v{}", version)
}

/// Atomically swappable holder of the current model group
pub struct ModelSlot {
    current: ArcSwapOption<ModelGroup>,
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSlot")
            .field("version", &self.version())
            .finish()
    }
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Snapshot of the published group, if any
    pub fn load(&self) -> Option<Arc<ModelGroup>> {
        self.current.load_full()
    }

    /// Replace the published group in one pointer swap
    pub fn publish(&self, group: ModelGroup) -> Arc<ModelGroup> {
        let group = Arc::new(group);
        self.current.store(Some(Arc::clone(&group)));
        group
    }

    pub fn clear(&self) {
        self.current.store(None);
    }

    pub fn is_trained(&self) -> bool {
        self.current.load().is_some()
    }

    /// Version of the published group; 0 when none
    pub fn version(&self) -> u64 {
        self.current.load_full().map(|g| g.version).unwrap_or(0)
    }
}

/// Summary of a successful training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub version: u64,
    pub training_samples: usize,
    pub positive_labels: usize,
    pub duration: Duration,
}

/// Train a model group from a window of snapshots.
///
/// Pure and synchronous; callers decide where it runs and whether to
/// publish the result.
pub fn train_models(
    window: &[MetricSnapshot],
    config: &TrainingConfig,
    version: u64,
) -> Result<ModelGroup, TrainingError> {
    if window.len() < config.min_samples {
        return Err(TrainingError::InsufficientData {
            have: window.len(),
            need: config.min_samples,
        });
    }

    let labels = label_window(window, config.horizon);
    if labels.is_empty() {
        return Err(TrainingError::NoLabelableSamples);
    }

    let features = FeatureExtractor::new().extract_all(window);
    let scaler = FeatureScaler::fit(&features)
        .ok_or_else(|| TrainingError::DegenerateFeatures("empty training window".to_string()))?;
    let scaled = scaler.transform_all(&features);
    if scaled.iter().any(|v| v.0.iter().any(|x| !x.is_finite())) {
        return Err(TrainingError::DegenerateFeatures(
            "non-finite value after scaling".to_string(),
        ));
    }

    let x: Vec<FeatureVector> = labels.iter().map(|(i, _)| scaled[*i]).collect();
    let y: Vec<bool> = labels.iter().map(|(_, label)| *label).collect();
    let positive_labels = y.iter().filter(|l| **l).count();

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(version));
    let classifier = FailureClassifier::fit(&x, &y, config.horizon, &config.forest, &mut rng);
    let detector = AnomalyDetector::fit(&scaled, &config.isolation, &mut rng);

    Ok(ModelGroup {
        scaler,
        classifier,
        detector,
        version,
        trained_at: Utc::now(),
        training_samples: window.len(),
        positive_labels,
    })
}

type TrainingJob = JoinHandle<(Result<ModelGroup, TrainingError>, Duration)>;

/// Decides when to retrain and publishes finished model groups
pub struct TrainingScheduler {
    config: TrainingConfig,
    slot: Arc<ModelSlot>,
    /// `total_ingested` at the last training attempt
    last_attempt: u64,
    in_flight: Option<TrainingJob>,
    metrics: RepairMetrics,
}

impl TrainingScheduler {
    pub fn new(config: TrainingConfig, slot: Arc<ModelSlot>) -> Self {
        Self {
            config,
            slot,
            last_attempt: 0,
            in_flight: None,
            metrics: RepairMetrics::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn slot(&self) -> &Arc<ModelSlot> {
        &self.slot
    }

    pub fn is_training(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether enough new snapshots arrived since the last attempt
    pub fn is_due(&self, store: &MetricsStore) -> bool {
        store.len() >= self.config.min_samples
            && store.total_ingested().saturating_sub(self.last_attempt)
                >= self.config.retrain_every.max(1)
    }

    /// Train on the calling thread and publish on success.
    ///
    /// On error the published group is left untouched.
    pub fn train_now(&mut self, window: &[MetricSnapshot]) -> Result<TrainingOutcome, TrainingError> {
        let version = self.slot.version() + 1;
        let started = Instant::now();
        let result = train_models(window, &self.config, version);
        self.finish(result, started.elapsed())
    }

    /// Start a background retrain when one is due and none is running.
    ///
    /// Returns true when a job was launched.
    pub fn maybe_spawn(&mut self, store: &MetricsStore) -> bool {
        if self.in_flight.is_some() || !self.is_due(store) {
            return false;
        }

        self.last_attempt = store.total_ingested();
        let window = store.to_vec();
        let config = self.config.clone();
        let version = self.slot.version() + 1;

        debug!(
            version = version,
            window = window.len(),
            "Starting background model training"
        );

        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let result = train_models(&window, &config, version);
            (result, started.elapsed())
        }));
        true
    }

    /// Collect a finished background job without waiting
    pub async fn poll_completed(&mut self) -> Option<Result<TrainingOutcome, TrainingError>> {
        match &self.in_flight {
            Some(handle) if handle.is_finished() => self.wait().await,
            _ => None,
        }
    }

    /// Wait for the running job, if any, and publish its result
    pub async fn wait(&mut self) -> Option<Result<TrainingOutcome, TrainingError>> {
        let handle = self.in_flight.take()?;
        let outcome = match handle.await {
            Ok((result, duration)) => self.finish(result, duration),
            Err(e) => {
                warn!(error = %e, "Training task did not complete");
                self.metrics.inc_training_failures();
                Err(TrainingError::TaskFailed(e.to_string()))
            }
        };
        Some(outcome)
    }

    fn finish(
        &mut self,
        result: Result<ModelGroup, TrainingError>,
        duration: Duration,
    ) -> Result<TrainingOutcome, TrainingError> {
        match result {
            Ok(group) => {
                let outcome = TrainingOutcome {
                    version: group.version,
                    training_samples: group.training_samples,
                    positive_labels: group.positive_labels,
                    duration,
                };
                let label = group.version_label();
                self.slot.publish(group);
                self.metrics.record_training(duration.as_secs_f64());
                self.metrics.set_model_version(&label);
                info!(
                    version = %label,
                    samples = outcome.training_samples,
                    positives = outcome.positive_labels,
                    duration_ms = duration.as_millis() as u64,
                    "Published new model group"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.inc_training_failures();
                warn!(error = %e, "Model training failed, keeping previous model group");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;

    fn snapshot(service: &str, ts: i64, cpu: f64, restarts: u64) -> MetricSnapshot {
        let mut s = MetricSnapshot::unavailable(service, ts);
        s.cpu_usage = cpu;
        s.memory_usage = 0.4;
        s.restart_count = restarts;
        s.health_status = HealthStatus::Healthy;
        s.request_rate = 50.0;
        s
    }

    /// 150 ticks for one service; hot CPU before a restart at tick 120
    fn restart_scenario() -> Vec<MetricSnapshot> {
        (0..150)
            .map(|t| {
                let cpu = if (115..120).contains(&t) { 0.9 } else { 0.2 };
                let restarts = if t >= 120 { 1 } else { 0 };
                snapshot("api", 1_700_000_000 + t as i64 * 60, cpu, restarts)
            })
            .collect()
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            forest: ForestParams {
                n_trees: 30,
                ..Default::default()
            },
            isolation: IsolationParams {
                n_trees: 30,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_train_models_requires_min_samples() {
        let window = restart_scenario();
        let err = train_models(&window[..99], &TrainingConfig::default(), 1).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::InsufficientData { have: 99, need: 100 }
        ));
    }

    #[test]
    fn test_train_now_publishes_full_group() {
        let slot = Arc::new(ModelSlot::new());
        let mut scheduler = TrainingScheduler::new(small_config(), Arc::clone(&slot));

        let outcome = scheduler.train_now(&restart_scenario()).unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.training_samples, 150);
        assert!(outcome.positive_labels > 0);

        let group = slot.load().unwrap();
        assert_eq!(group.version_label(), "v1");
        assert_eq!(group.classifier.n_trees(), 30);
        assert!(group.detector.threshold() <= 1.0);
    }

    #[test]
    fn test_failed_training_keeps_previous_group() {
        let slot = Arc::new(ModelSlot::new());
        let mut scheduler = TrainingScheduler::new(small_config(), Arc::clone(&slot));
        scheduler.train_now(&restart_scenario()).unwrap();
        let before = slot.load().unwrap();

        let short: Vec<_> = restart_scenario().into_iter().take(50).collect();
        assert!(scheduler.train_now(&short).is_err());

        let after = slot.load().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(slot.version(), 1);
    }

    #[test]
    fn test_under_threshold_leaves_slot_empty() {
        let slot = Arc::new(ModelSlot::new());
        let mut scheduler = TrainingScheduler::new(small_config(), Arc::clone(&slot));
        let short: Vec<_> = restart_scenario().into_iter().take(99).collect();
        assert!(scheduler.train_now(&short).is_err());
        assert!(!slot.is_trained());
    }

    #[test]
    fn test_pre_restart_ticks_score_higher() {
        let window = restart_scenario();
        let group = train_models(&window, &TrainingConfig::default(), 1).unwrap();

        let near_failure = group.assess(&window[115]).probability;
        let quiet = group.assess(&window[10]).probability;
        assert!(
            near_failure > quiet,
            "tick 115 scored {} vs tick 10 {}",
            near_failure,
            quiet
        );
    }

    #[test]
    fn test_versions_increment() {
        let slot = Arc::new(ModelSlot::new());
        let mut scheduler = TrainingScheduler::new(small_config(), Arc::clone(&slot));
        scheduler.train_now(&restart_scenario()).unwrap();
        let outcome = scheduler.train_now(&restart_scenario()).unwrap();
        assert_eq!(outcome.version, 2);
        assert_eq!(slot.version(), 2);
    }

    #[tokio::test]
    async fn test_background_training_runs_once_per_cadence() {
        let slot = Arc::new(ModelSlot::new());
        let mut scheduler = TrainingScheduler::new(small_config(), Arc::clone(&slot));
        let mut store = MetricsStore::new(1000);

        for s in restart_scenario().into_iter().take(99) {
            store.append(s).unwrap();
        }
        assert!(!scheduler.maybe_spawn(&store));

        for s in restart_scenario().into_iter().skip(99) {
            store.append(s).unwrap();
        }
        assert!(scheduler.maybe_spawn(&store));
        // A job is already running
        assert!(!scheduler.maybe_spawn(&store));

        let outcome = scheduler.wait().await.unwrap().unwrap();
        assert_eq!(outcome.version, 1);
        assert!(slot.is_trained());

        // Nothing new ingested since the attempt
        assert!(!scheduler.maybe_spawn(&store));
        assert!(scheduler.poll_completed().await.is_none());
    }
}
