//! Tick-driven repair loop
//!
//! Each tick samples every configured service, stores the snapshot, scores
//! it with the published model group and, when the failure probability
//! crosses the threshold (or failing that, the detector flags it), lets the
//! policy remediate. The outcome of every action is measured after a fixed
//! delay and fed back into the Q-table.

use super::{ActionExecutor, EngineState, MetricsSource};
use crate::error::TrainingError;
use crate::health::HealthRegistry;
use crate::models::{
    Action, FailureEvent, FailurePrediction, MetricSnapshot, RepairAction, RepairTrigger,
};
use crate::observability::{RepairMetrics, StructuredLogger};
use crate::policy::{DiscretizedState, RewardModel};
use crate::predictor::predicted_failure_time;
use crate::training::{format_version, TrainingConfig, TrainingOutcome, TrainingScheduler};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time between ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default wait before measuring an action's effect
pub const DEFAULT_POST_ACTION_DELAY: Duration = Duration::from_secs(30);

/// Default bound on a single action execution
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure probability above which the loop acts
pub const DEFAULT_FAILURE_THRESHOLD: f64 = 0.7;

/// Ingested snapshots between flushes of learned state
pub const DEFAULT_FLUSH_EVERY: u64 = 500;

/// Configuration for the repair loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Services sampled every tick
    pub services: Vec<String>,
    pub tick_interval: Duration,
    pub post_action_delay: Duration,
    /// An execution exceeding this counts as failed
    pub action_timeout: Duration,
    pub failure_threshold: f64,
    pub flush_every: u64,
    /// Whether detector-flagged snapshots trigger remediation
    pub act_on_anomaly: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            post_action_delay: DEFAULT_POST_ACTION_DELAY,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            flush_every: DEFAULT_FLUSH_EVERY,
            act_on_anomaly: true,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub ingested: usize,
    pub rejected: usize,
    pub failures: Vec<FailureEvent>,
    pub predictions: Vec<FailurePrediction>,
    pub actions: Vec<RepairAction>,
    pub training_started: bool,
    pub flushed: bool,
}

/// The control loop. Owns the engine state for its lifetime.
pub struct RepairLoop {
    state: EngineState,
    source: Arc<dyn MetricsSource>,
    executor: Arc<dyn ActionExecutor>,
    trainer: TrainingScheduler,
    reward: RewardModel,
    config: LoopConfig,
    health: Option<HealthRegistry>,
    metrics: RepairMetrics,
    logger: StructuredLogger,
    tick: u64,
    /// `total_ingested` at the last flush
    last_flush: u64,
}

impl RepairLoop {
    pub fn new(
        state: EngineState,
        source: Arc<dyn MetricsSource>,
        executor: Arc<dyn ActionExecutor>,
        config: LoopConfig,
        training: TrainingConfig,
    ) -> Self {
        let trainer = TrainingScheduler::new(training, Arc::clone(state.models()));
        let last_flush = state.store().total_ingested();
        Self {
            state,
            source,
            executor,
            trainer,
            reward: RewardModel::default(),
            config,
            health: None,
            metrics: RepairMetrics::new(),
            logger: StructuredLogger::new("repair-agent"),
            tick: 0,
            last_flush,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn trainer_mut(&mut self) -> &mut TrainingScheduler {
        &mut self.trainer
    }

    /// Run until a shutdown signal arrives, then flush and hand back the
    /// state
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> EngineState {
        info!(
            services = self.config.services.len(),
            interval_secs = self.config.tick_interval.as_secs(),
            threshold = self.config.failure_threshold,
            "Starting repair loop"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(
                        tick = report.tick,
                        ingested = report.ingested,
                        rejected = report.rejected,
                        predictions = report.predictions.len(),
                        actions = report.actions.len(),
                        "Tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down repair loop");
                    break;
                }
            }
        }

        // Let an in-flight job finish so its group is persisted
        if let Some(result) = self.trainer.wait().await {
            self.log_training_result(result);
        }
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Final flush failed");
        }
        self.state
    }

    /// One pass over every service
    pub async fn tick(&mut self) -> TickReport {
        let tick = self.tick;
        self.tick += 1;
        self.metrics.inc_ticks();

        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        if let Some(result) = self.trainer.poll_completed().await {
            self.log_training_result(result);
        }

        let services = self.config.services.clone();
        for service_id in &services {
            self.process_service(service_id, tick, &mut report).await;
        }

        report.training_started = self.trainer.maybe_spawn(self.state.store());

        let total = self.state.store().total_ingested();
        if total.saturating_sub(self.last_flush) >= self.config.flush_every.max(1) {
            self.last_flush = total;
            report.flushed = self.flush().await.is_ok();
        }

        self.metrics.set_store_entries(self.state.store().len());
        self.metrics.set_q_table_entries(self.state.policy().len());
        self.update_health(&report).await;

        report
    }

    fn log_training_result(&self, result: Result<TrainingOutcome, TrainingError>) {
        match result {
            Ok(outcome) => self.logger.log_training(
                &format_version(outcome.version),
                outcome.training_samples,
                outcome.positive_labels,
                outcome.duration.as_millis() as u64,
            ),
            Err(e) => self.logger.log_training_failed(&e.to_string()),
        }
    }

    async fn process_service(&mut self, service_id: &str, tick: u64, report: &mut TickReport) {
        let snapshot = self.source.sample(service_id, tick).await;
        let previous = self.state.store().latest_for(service_id).cloned();

        if let Err(e) = self.state.store_mut().append(snapshot.clone()) {
            warn!(service_id = %service_id, error = %e, "Rejected snapshot");
            self.metrics.inc_snapshots_rejected();
            report.rejected += 1;
            return;
        }
        self.metrics.inc_snapshots_ingested();
        report.ingested += 1;

        if let Some(event) = FailureEvent::observe(&snapshot, previous.as_ref()) {
            self.metrics.inc_failures_observed();
            self.logger.log_failure(&event);
            self.state.history_mut().record_failure(event.clone());
            report.failures.push(event);
        }

        let Some(prediction) = self.predict(&snapshot) else {
            return;
        };

        let trigger = if prediction.probability > self.config.failure_threshold {
            self.logger.log_prediction(&prediction);
            Some(RepairTrigger::PredictedFailure)
        } else if prediction.anomalous && self.config.act_on_anomaly {
            Some(RepairTrigger::Anomaly)
        } else {
            None
        };

        let action = prediction.recommended_action;
        report.predictions.push(prediction);

        if let Some(trigger) = trigger {
            let record = self
                .remediate(service_id, action, trigger, &snapshot, tick)
                .await;
            report.actions.push(record);
        }
    }

    /// Score a snapshot; `None` while no model group is published
    fn predict(&mut self, snapshot: &MetricSnapshot) -> Option<FailurePrediction> {
        let group = self.state.models().load()?;
        let assessment = group.assess(snapshot);
        self.metrics.inc_predictions();

        if assessment.anomalous {
            self.metrics.inc_anomalies();
            self.logger.log_anomaly(
                &snapshot.service_id,
                assessment.anomaly_score,
                group.detector.threshold(),
            );
        }

        let state = DiscretizedState::from_snapshot(snapshot);
        let recommended_action = self.state.policy_mut().select_action(&state);
        let probability = assessment.probability;

        Some(FailurePrediction {
            service_id: snapshot.service_id.clone(),
            probability,
            predicted_time: predicted_failure_time(
                snapshot,
                probability,
                chrono::Utc::now().timestamp(),
            ),
            recommended_action,
            confidence: probability.max(1.0 - probability),
            feature_importances: group.classifier.feature_importances(),
            anomalous: assessment.anomalous,
            model_version: group.version_label(),
        })
    }

    /// Execute an action, measure its effect and learn from it
    async fn remediate(
        &mut self,
        service_id: &str,
        action: Action,
        trigger: RepairTrigger,
        observed: &MetricSnapshot,
        tick: u64,
    ) -> RepairAction {
        let sampled = self.source.sample(service_id, tick).await;
        let before = match sampled.validate() {
            Ok(()) => sampled,
            Err(e) => {
                debug!(service_id = %service_id, error = %e, "Using tick snapshot as baseline");
                observed.clone()
            }
        };

        let success = match timeout(
            self.config.action_timeout,
            self.executor.execute(service_id, action),
        )
        .await
        {
            Ok(success) => success,
            Err(_) => {
                warn!(
                    service_id = %service_id,
                    action = %action,
                    timeout_secs = self.config.action_timeout.as_secs(),
                    "Action timed out"
                );
                false
            }
        };

        if !self.config.post_action_delay.is_zero() {
            tokio::time::sleep(self.config.post_action_delay).await;
        }

        let sampled = self.source.sample(service_id, tick).await;
        let after = match sampled.validate() {
            Ok(()) => Some(sampled),
            Err(e) => {
                debug!(service_id = %service_id, error = %e, "Post-action sample unusable");
                None
            }
        };

        let reward = self.reward.reward(&before, after.as_ref(), success);
        let state = DiscretizedState::from_snapshot(&before);
        let q = self
            .state
            .policy_mut()
            .update_q_value(&state, action, reward);
        debug!(state = %state, action = %action, reward = reward, q_value = q, "Updated Q-value");

        let record = RepairAction {
            timestamp: chrono::Utc::now().timestamp(),
            service_id: service_id.to_string(),
            action,
            trigger,
            metrics_before: before,
            metrics_after: after,
            success,
            reward,
        };

        self.metrics.record_action(action, success, reward);
        self.logger.log_action(&record);
        self.state.history_mut().record_repair(record.clone());
        record
    }

    /// Persist all learned state
    pub async fn flush(&mut self) -> Result<()> {
        match self.state.flush() {
            Ok(()) => {
                self.logger.log_persistence(
                    "flush",
                    true,
                    &format!("model_version={}", self.state.models().version()),
                );
                if let Some(health) = &self.health {
                    health.report_flush(None).await;
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.inc_persistence_failures();
                self.logger.log_persistence("flush", false, &e.to_string());
                if let Some(health) = &self.health {
                    health.report_flush(Some(&e.to_string())).await;
                }
                Err(e.into())
            }
        }
    }

    async fn update_health(&self, report: &TickReport) {
        let Some(health) = &self.health else {
            return;
        };

        health
            .report_collection(report.ingested, report.rejected)
            .await;
        health.report_policy(self.state.policy().len()).await;

        let version = self.state.models().load().map(|g| g.version_label());
        health.report_model(version.as_deref()).await;
    }
}

/// Builder for the repair loop
pub struct RepairLoopBuilder {
    state: Option<EngineState>,
    source: Option<Arc<dyn MetricsSource>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    config: LoopConfig,
    training: TrainingConfig,
    health: Option<HealthRegistry>,
    node_name: Option<String>,
}

impl RepairLoopBuilder {
    pub fn new() -> Self {
        Self {
            state: None,
            source: None,
            executor: None,
            config: LoopConfig::default(),
            training: TrainingConfig::default(),
            health: None,
            node_name: None,
        }
    }

    pub fn state(mut self, state: EngineState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    /// Report component health into this registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Node name attached to structured log events
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<RepairLoop> {
        let state = self
            .state
            .ok_or_else(|| anyhow::anyhow!("Engine state is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("Action executor is required"))?;

        let mut repair_loop = RepairLoop::new(state, source, executor, self.config, self.training);
        repair_loop.health = self.health;
        if let Some(name) = self.node_name {
            repair_loop.logger = StructuredLogger::new(name);
        }
        Ok(repair_loop)
    }
}

impl Default for RepairLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
