//! Control loop wiring the decision engine to the outside world
//!
//! Metrics come in through a [`MetricsSource`] and actions go out through an
//! [`ActionExecutor`]. Everything the loop learns lives in an
//! [`EngineState`] that it owns for its whole lifetime.

mod r#loop;
mod state;

pub use r#loop::{
    LoopConfig, RepairLoop, RepairLoopBuilder, TickReport, DEFAULT_ACTION_TIMEOUT,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_FLUSH_EVERY, DEFAULT_POST_ACTION_DELAY, DEFAULT_TICK_INTERVAL,
};
pub use state::EngineState;

use crate::models::{Action, MetricSnapshot};

pub use async_trait::async_trait;

/// Supplies per-service metric snapshots
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Sample one service. Never fails: values that could not be collected
    /// come back as 0.0.
    async fn sample(&self, service_id: &str, tick: u64) -> MetricSnapshot;
}

/// Carries out remediation actions
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action against a service and report whether it succeeded
    async fn execute(&self, service_id: &str, action: Action) -> bool;
}
