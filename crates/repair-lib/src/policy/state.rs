//! Discretized RL state

use crate::models::{HealthStatus, MetricSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage above this is `High`
const HIGH_USAGE: f64 = 0.7;
/// Usage above this (and not high) is `Medium`
const MEDIUM_USAGE: f64 = 0.3;

/// Coarse usage level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Low,
    Medium,
    High,
}

impl UsageLevel {
    pub fn from_usage(value: f64) -> Self {
        if value > HIGH_USAGE {
            UsageLevel::High
        } else if value > MEDIUM_USAGE {
            UsageLevel::Medium
        } else {
            UsageLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageLevel::Low => "low",
            UsageLevel::Medium => "medium",
            UsageLevel::High => "high",
        }
    }
}

/// Health as seen by the policy; only `unhealthy` counts as unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBucket {
    Healthy,
    Unhealthy,
}

impl HealthBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBucket::Healthy => "healthy",
            HealthBucket::Unhealthy => "unhealthy",
        }
    }
}

/// Bucketed snapshot used as the Q-table state key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscretizedState {
    pub service_id: String,
    pub cpu: UsageLevel,
    pub memory: UsageLevel,
    pub health: HealthBucket,
}

impl DiscretizedState {
    pub fn new(
        service_id: impl Into<String>,
        cpu: UsageLevel,
        memory: UsageLevel,
        health: HealthBucket,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            cpu,
            memory,
            health,
        }
    }

    pub fn from_snapshot(snapshot: &MetricSnapshot) -> Self {
        let health = if snapshot.health_status == HealthStatus::Unhealthy {
            HealthBucket::Unhealthy
        } else {
            HealthBucket::Healthy
        };
        Self {
            service_id: snapshot.service_id.clone(),
            cpu: UsageLevel::from_usage(snapshot.cpu_usage),
            memory: UsageLevel::from_usage(snapshot.memory_usage),
            health,
        }
    }

    /// Canonical string form, e.g. `api_high_low_healthy`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DiscretizedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.service_id,
            self.cpu.as_str(),
            self.memory.as_str(),
            self.health.as_str()
        )
    }
}
