//! Decision engine for predictive service repair
//!
//! This crate provides the core functionality for:
//! - A bounded rolling window of per-service metric snapshots
//! - Failure prediction with a random forest over snapshot features
//! - Anomaly detection with an isolation forest
//! - Epsilon-greedy Q-learning over remediation actions
//! - Background retraining, atomic model publication and persistence
//! - The tick-driven repair loop, health checks and observability

pub mod anomaly;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod predictor;
pub mod store;
pub mod training;

pub use engine::{
    ActionExecutor, EngineState, LoopConfig, MetricsSource, RepairLoop, RepairLoopBuilder,
    TickReport,
};
pub use error::{PersistenceError, PolicyError, SnapshotError, TrainingError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{RepairMetrics, StructuredLogger};
pub use policy::{DiscretizedState, PolicyConfig, PolicyEngine, QTable};
pub use store::{MetricsStore, StoreConfig};
pub use training::{
    ModelGroup, ModelPersistence, ModelSlot, PersistenceConfig, RepairHistory, TrainingConfig,
    TrainingScheduler,
};
