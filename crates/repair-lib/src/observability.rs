//! Observability infrastructure for the repair agent
//!
//! Provides:
//! - Prometheus metrics (ticks, predictions, actions, rewards, training, persistence)
//! - Structured JSON logging with tracing

use crate::models::{Action, FailureEvent, FailurePrediction, RepairAction};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for training latency (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Buckets spanning the reward range, from the failure penalty upwards
const REWARD_BUCKETS: &[f64] = &[-10.0, -6.0, -3.0, 0.0, 1.0, 2.5, 5.0, 7.5, 10.0, 15.0, 20.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RepairMetricsInner> = OnceLock::new();

struct RepairMetricsInner {
    ticks: IntCounter,
    snapshots_ingested: IntCounter,
    snapshots_rejected: IntCounter,
    predictions: IntCounter,
    anomalies: IntCounter,
    failures_observed: IntCounter,
    actions: IntCounterVec,
    action_reward: Histogram,
    training_runs: IntCounter,
    training_failures: IntCounter,
    training_latency_seconds: Histogram,
    model_version_info: GaugeVec,
    q_table_entries: IntGauge,
    store_entries: IntGauge,
    persistence_failures: IntCounter,
}

impl RepairMetricsInner {
    fn new() -> Self {
        Self {
            ticks: register_int_counter!(
                "repair_agent_ticks_total",
                "Total number of control loop ticks"
            )
            .expect("Failed to register ticks_total"),

            snapshots_ingested: register_int_counter!(
                "repair_agent_snapshots_ingested_total",
                "Total number of metric snapshots accepted into the store"
            )
            .expect("Failed to register snapshots_ingested_total"),

            snapshots_rejected: register_int_counter!(
                "repair_agent_snapshots_rejected_total",
                "Total number of metric snapshots rejected by validation"
            )
            .expect("Failed to register snapshots_rejected_total"),

            predictions: register_int_counter!(
                "repair_agent_predictions_total",
                "Total number of failure predictions made"
            )
            .expect("Failed to register predictions_total"),

            anomalies: register_int_counter!(
                "repair_agent_anomalies_total",
                "Total number of snapshots flagged as anomalous"
            )
            .expect("Failed to register anomalies_total"),

            failures_observed: register_int_counter!(
                "repair_agent_failures_observed_total",
                "Total number of degradation events seen in the metric stream"
            )
            .expect("Failed to register failures_observed_total"),

            actions: register_int_counter_vec!(
                "repair_agent_actions_total",
                "Remediation actions executed, by action and outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register actions_total"),

            action_reward: register_histogram!(
                "repair_agent_action_reward",
                "Reward observed for executed remediation actions",
                REWARD_BUCKETS.to_vec()
            )
            .expect("Failed to register action_reward"),

            training_runs: register_int_counter!(
                "repair_agent_training_runs_total",
                "Total number of successful model group trainings"
            )
            .expect("Failed to register training_runs_total"),

            training_failures: register_int_counter!(
                "repair_agent_training_failures_total",
                "Total number of failed model group trainings"
            )
            .expect("Failed to register training_failures_total"),

            training_latency_seconds: register_histogram!(
                "repair_agent_training_latency_seconds",
                "Time spent training a model group",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_latency_seconds"),

            model_version_info: register_gauge_vec!(
                "repair_agent_model_version_info",
                "Information about the currently published model group",
                &["version"]
            )
            .expect("Failed to register model_version_info"),

            q_table_entries: register_int_gauge!(
                "repair_agent_q_table_entries",
                "Number of learned state-action values"
            )
            .expect("Failed to register q_table_entries"),

            store_entries: register_int_gauge!(
                "repair_agent_store_entries",
                "Number of snapshots in the rolling window"
            )
            .expect("Failed to register store_entries"),

            persistence_failures: register_int_counter!(
                "repair_agent_persistence_failures_total",
                "Total number of failed saves or loads of learned state"
            )
            .expect("Failed to register persistence_failures_total"),
        }
    }
}

/// Repair metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct RepairMetrics {
    _private: (),
}

impl Default for RepairMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RepairMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RepairMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RepairMetricsInner {
        GLOBAL_METRICS.get_or_init(RepairMetricsInner::new)
    }

    pub fn inc_ticks(&self) {
        self.inner().ticks.inc();
    }

    pub fn inc_snapshots_ingested(&self) {
        self.inner().snapshots_ingested.inc();
    }

    pub fn inc_snapshots_rejected(&self) {
        self.inner().snapshots_rejected.inc();
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions.inc();
    }

    pub fn inc_anomalies(&self) {
        self.inner().anomalies.inc();
    }

    pub fn inc_failures_observed(&self) {
        self.inner().failures_observed.inc();
    }

    /// Record an executed action and its reward
    pub fn record_action(&self, action: Action, success: bool, reward: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .actions
            .with_label_values(&[action.as_str(), outcome])
            .inc();
        self.inner().action_reward.observe(reward);
    }

    /// Record a successful training run
    pub fn record_training(&self, duration_secs: f64) {
        self.inner().training_runs.inc();
        self.inner().training_latency_seconds.observe(duration_secs);
    }

    pub fn inc_training_failures(&self) {
        self.inner().training_failures.inc();
    }

    /// Update model version info
    pub fn set_model_version(&self, version: &str) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version])
            .set(1.0);
    }

    pub fn set_q_table_entries(&self, entries: usize) {
        self.inner().q_table_entries.set(entries as i64);
    }

    pub fn set_store_entries(&self, entries: usize) {
        self.inner().store_entries.set(entries as i64);
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }
}

/// Structured logger for repair events
///
/// Provides consistent JSON-formatted logging for predictions,
/// anomalies, actions and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log a failure prediction
    pub fn log_prediction(&self, prediction: &FailurePrediction) {
        info!(
            event = "failure_predicted",
            node = %self.node_name,
            service_id = %prediction.service_id,
            probability = prediction.probability,
            confidence = prediction.confidence,
            predicted_time = prediction.predicted_time,
            recommended_action = %prediction.recommended_action,
            anomalous = prediction.anomalous,
            model_version = %prediction.model_version,
            "Failure predicted"
        );
    }

    /// Log an anomaly flagged by the detector
    pub fn log_anomaly(&self, service_id: &str, score: f64, threshold: f64) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            service_id = %service_id,
            score = score,
            threshold = threshold,
            "Anomalous service behaviour detected"
        );
    }

    /// Log a degradation observed in the metric stream
    pub fn log_failure(&self, failure: &FailureEvent) {
        warn!(
            event = "failure_observed",
            node = %self.node_name,
            service_id = %failure.service_id,
            kind = ?failure.kind,
            restart_count = failure.restart_count,
            "Service degradation observed"
        );
    }

    /// Log an executed remediation and its outcome
    pub fn log_action(&self, record: &RepairAction) {
        if record.success {
            info!(
                event = "repair_action",
                node = %self.node_name,
                service_id = %record.service_id,
                action = %record.action,
                trigger = record.trigger.as_str(),
                success = true,
                reward = record.reward,
                "Repair action executed"
            );
        } else {
            warn!(
                event = "repair_action",
                node = %self.node_name,
                service_id = %record.service_id,
                action = %record.action,
                trigger = record.trigger.as_str(),
                success = false,
                reward = record.reward,
                "Repair action failed"
            );
        }
    }

    /// Log a training attempt
    pub fn log_training(&self, version: &str, samples: usize, positives: usize, duration_ms: u64) {
        info!(
            event = "model_trained",
            node = %self.node_name,
            model_version = %version,
            training_samples = samples,
            positive_labels = positives,
            duration_ms = duration_ms,
            "Model group trained and published"
        );
    }

    /// Log a failed training attempt
    pub fn log_training_failed(&self, error: &str) {
        warn!(
            event = "model_training_failed",
            node = %self.node_name,
            error = %error,
            "Model training failed, keeping previous model group"
        );
    }

    /// Log a persistence operation
    pub fn log_persistence(&self, operation: &str, success: bool, detail: &str) {
        if success {
            info!(
                event = "persistence",
                node = %self.node_name,
                operation = %operation,
                detail = %detail,
                "Learned state persisted"
            );
        } else {
            warn!(
                event = "persistence",
                node = %self.node_name,
                operation = %operation,
                detail = %detail,
                "Persistence failed, continuing with in-memory state"
            );
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, model_version: &str, services: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            model_version = %model_version,
            services = services,
            "Repair agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Repair agent shutting down"
        );
    }
}
