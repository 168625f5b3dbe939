//! Component health for the liveness and readiness probes
//!
//! The repair loop reports four components after every tick or flush:
//!
//! - `collector`: degraded when a tick ingested nothing, unhealthy once that
//!   repeats for [`UNHEALTHY_AFTER`] ticks in a row
//! - `predictor`: degraded until a model group has been trained or restored
//! - `policy`: degraded while the Q-table is empty
//! - `persistence`: degraded on a failed flush, unhealthy after
//!   [`UNHEALTHY_AFTER`] consecutive failures
//!
//! Any unhealthy component fails `/healthz` and withdraws readiness.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed ticks or flushes before a component turns unhealthy
pub const UNHEALTHY_AFTER: u32 = 3;

/// Predictor message while no model group is published
pub const NO_MODEL_MESSAGE: &str = "no model group trained yet";

/// Policy message while nothing has been learned
pub const EMPTY_POLICY_MESSAGE: &str = "q-table is empty";

/// Component names reported by the repair loop
pub mod components {
    pub const COLLECTOR: &str = "collector";
    pub const PREDICTOR: &str = "predictor";
    pub const POLICY: &str = "policy";
    pub const PERSISTENCE: &str = "persistence";

    pub const ALL: [&str; 4] = [COLLECTOR, PREDICTOR, POLICY, PERSISTENCE];
}

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    /// First unhealthy component, with its message
    fn first_unhealthy(&self) -> Option<(&str, Option<&str>)> {
        self.components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, c)| (name.as_str(), c.message.as_deref()))
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    /// Consecutive failures per component
    streaks: HashMap<&'static str, u32>,
    ready: bool,
}

/// Shared component health, written by the loop and read by the API
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every component; the predictor and policy start degraded
    /// until there is something learned to report
    pub async fn register_repair_components(&self) {
        let mut inner = self.inner.write().await;
        for name in components::ALL {
            inner
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
        inner.components.insert(
            components::PREDICTOR.to_string(),
            ComponentHealth::degraded(NO_MODEL_MESSAGE),
        );
        inner.components.insert(
            components::POLICY.to_string(),
            ComponentHealth::degraded(EMPTY_POLICY_MESSAGE),
        );
    }

    /// Overwrite one component's state
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.inner
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// Current health of one component
    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.inner.read().await.components.get(name).cloned()
    }

    /// Reflect model availability on the predictor
    pub async fn report_model(&self, version: Option<&str>) {
        let health = match version {
            Some(_) => ComponentHealth::healthy(),
            None => ComponentHealth::degraded(NO_MODEL_MESSAGE),
        };
        self.update(components::PREDICTOR, health).await;
    }

    /// Reflect how many state/action values the policy has learned
    pub async fn report_policy(&self, q_entries: usize) {
        let health = if q_entries == 0 {
            ComponentHealth::degraded(EMPTY_POLICY_MESSAGE)
        } else {
            ComponentHealth::healthy()
        };
        self.update(components::POLICY, health).await;
    }

    /// Reflect one tick of sampling on the collector. A tick that sampled
    /// nothing at all is not counted as a failure.
    pub async fn report_collection(&self, ingested: usize, rejected: usize) {
        let failure = (ingested == 0 && rejected > 0)
            .then(|| format!("all {} snapshots rejected", rejected));
        self.report_streak(components::COLLECTOR, failure).await;
    }

    /// Reflect the outcome of a flush on persistence
    pub async fn report_flush(&self, error: Option<&str>) {
        let failure = error.map(|e| format!("flush failed: {}", e));
        self.report_streak(components::PERSISTENCE, failure).await;
    }

    /// Healthy on success, degraded on a failure, unhealthy once failures
    /// reach [`UNHEALTHY_AFTER`] in a row
    async fn report_streak(&self, name: &'static str, failure: Option<String>) {
        let mut inner = self.inner.write().await;
        let health = match failure {
            None => {
                inner.streaks.remove(name);
                ComponentHealth::healthy()
            }
            Some(message) => {
                let streak = inner.streaks.entry(name).or_insert(0);
                *streak += 1;
                if *streak >= UNHEALTHY_AFTER {
                    ComponentHealth::unhealthy(format!("{} ({} in a row)", message, streak))
                } else {
                    ComponentHealth::degraded(message)
                }
            }
        };
        inner.components.insert(name.to_string(), health);
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.inner.read().await.components.clone())
    }

    /// Ready once learned state is loaded and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.inner.read().await.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Learned state not yet loaded".to_string()),
            };
        }

        let health = self.health().await;
        match health.first_unhealthy() {
            Some((name, message)) => ReadinessResponse {
                ready: false,
                reason: Some(match message {
                    Some(m) => format!("{} unhealthy: {}", name, m),
                    None => format!("{} unhealthy", name),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
