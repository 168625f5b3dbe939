//! Agent configuration

use anyhow::{Context, Result};
use repair_lib::engine::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_FLUSH_EVERY,
    DEFAULT_POST_ACTION_DELAY, DEFAULT_TICK_INTERVAL,
};
use repair_lib::policy::{DEFAULT_EPSILON, DEFAULT_LEARNING_RATE};
use repair_lib::store::DEFAULT_CAPACITY;
use repair_lib::training::DEFAULT_RETRAIN_EVERY;
use repair_lib::{LoopConfig, PersistenceConfig, PolicyConfig, StoreConfig, TrainingConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment prefix, e.g. `REPAIR_AGENT_TICK_INTERVAL_SECS=30`
pub const ENV_PREFIX: &str = "REPAIR_AGENT";

/// Optional file layered under the environment
pub const CONFIG_FILE_ENV: &str = "REPAIR_AGENT_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prometheus server queried for snapshots
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Services sampled every tick
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_post_action_delay")]
    pub post_action_delay_secs: u64,

    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    #[serde(default = "default_true")]
    pub act_on_anomaly: bool,

    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Fixes exploration and training randomness when set
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,

    #[serde(default = "default_retrain_every")]
    pub retrain_every: u64,

    #[serde(default = "default_flush_every")]
    pub flush_every: u64,

    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_query_timeout() -> u64 {
    5
}

fn default_services() -> Vec<String> {
    Vec::new()
}

fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL.as_secs()
}

fn default_post_action_delay() -> u64 {
    DEFAULT_POST_ACTION_DELAY.as_secs()
}

fn default_action_timeout() -> u64 {
    DEFAULT_ACTION_TIMEOUT.as_secs()
}

fn default_failure_threshold() -> f64 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

fn default_store_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_retrain_every() -> u64 {
    DEFAULT_RETRAIN_EVERY
}

fn default_flush_every() -> u64 {
    DEFAULT_FLUSH_EVERY
}

fn default_model_dir() -> PathBuf {
    PersistenceConfig::default().model_dir
}

fn default_history_path() -> PathBuf {
    PersistenceConfig::default().history_path
}

impl AgentConfig {
    /// Load configuration from an optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("services")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    /// Deserialize and validate whatever sources the builder holds
    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: AgentConfig = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.services.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("services must not contain empty names");
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            anyhow::bail!(
                "failure_threshold must be within [0, 1], got {}",
                self.failure_threshold
            );
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            services: self.services.clone(),
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            post_action_delay: Duration::from_secs(self.post_action_delay_secs),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            failure_threshold: self.failure_threshold,
            flush_every: self.flush_every,
            act_on_anomaly: self.act_on_anomaly,
        }
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            epsilon: self.epsilon,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            capacity: self.store_capacity,
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        let defaults = TrainingConfig::default();
        TrainingConfig {
            retrain_every: self.retrain_every,
            seed: self.seed.unwrap_or(defaults.seed),
            ..defaults
        }
    }

    pub fn persistence_config(&self) -> PersistenceConfig {
        PersistenceConfig {
            model_dir: self.model_dir.clone(),
            history_path: self.history_path.clone(),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
