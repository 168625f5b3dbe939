//! Core data models for the repair engine

use crate::error::SnapshotError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of numeric features derived from a snapshot
pub const NUM_FEATURES: usize = 9;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "cpu",
    "memory",
    "disk",
    "network_errors",
    "restarts",
    "health",
    "response_time",
    "error_rate",
    "request_rate",
];

/// Reported health of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Down => "down",
        }
    }

    /// Parse a health string as reported by container runtimes.
    /// Anything unrecognised maps to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            "down" => HealthStatus::Down,
            _ => HealthStatus::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time operational metrics for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Unix seconds
    pub timestamp: i64,
    pub service_id: String,
    /// Fraction of CPU quota in use, 0..=1
    pub cpu_usage: f64,
    /// Fraction of memory limit in use, 0..=1
    pub memory_usage: f64,
    /// Fraction of disk in use, 0..=1
    pub disk_usage: f64,
    /// Network receive errors per second
    pub network_error_rate: f64,
    /// Container restarts, monotonic per service
    pub restart_count: u64,
    pub health_status: HealthStatus,
    /// 95th percentile response time in seconds
    pub p95_response_time: f64,
    /// Fraction of requests failing, 0..=1
    pub error_rate: f64,
    /// Requests per second
    pub request_rate: f64,
}

impl MetricSnapshot {
    /// Snapshot used when the upstream source could not be reached.
    /// Every numeric field is zero so scoring stays live.
    pub fn unavailable(service_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            service_id: service_id.into(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            network_error_rate: 0.0,
            restart_count: 0,
            health_status: HealthStatus::Unknown,
            p95_response_time: 0.0,
            error_rate: 0.0,
            request_rate: 0.0,
        }
    }

    /// Check required fields and declared value ranges
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.service_id.trim().is_empty() {
            return Err(SnapshotError::MissingServiceId);
        }

        let unit_fields = [
            ("cpu_usage", self.cpu_usage),
            ("memory_usage", self.memory_usage),
            ("disk_usage", self.disk_usage),
            ("error_rate", self.error_rate),
        ];
        for (field, value) in unit_fields {
            check_finite(field, value)?;
            if !(0.0..=1.0).contains(&value) {
                return Err(SnapshotError::OutOfRange { field, value });
            }
        }

        let non_negative = [
            ("network_error_rate", self.network_error_rate),
            ("p95_response_time", self.p95_response_time),
            ("request_rate", self.request_rate),
        ];
        for (field, value) in non_negative {
            check_finite(field, value)?;
            if value < 0.0 {
                return Err(SnapshotError::OutOfRange { field, value });
            }
        }

        Ok(())
    }

    /// Whether this snapshot shows degradation relative to `previous`
    pub fn is_degraded_since(&self, previous: &MetricSnapshot) -> bool {
        self.health_status == HealthStatus::Unhealthy
            || self.restart_count > previous.restart_count
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), SnapshotError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SnapshotError::NonFinite { field })
    }
}

/// Fixed-length numeric projection of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        NUM_FEATURES
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Corrective action the engine can choose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Restart,
    ScaleUp,
    ScaleDown,
    ClearCache,
    OptimizeConfig,
    Rollback,
    NoAction,
}

impl Action {
    /// All actions in tie-break order
    pub const ALL: [Action; 7] = [
        Action::Restart,
        Action::ScaleUp,
        Action::ScaleDown,
        Action::ClearCache,
        Action::OptimizeConfig,
        Action::Rollback,
        Action::NoAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Restart => "restart",
            Action::ScaleUp => "scale_up",
            Action::ScaleDown => "scale_down",
            Action::ClearCache => "clear_cache",
            Action::OptimizeConfig => "optimize_config",
            Action::Rollback => "rollback",
            Action::NoAction => "no_action",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|a| a.as_str() == raw)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure prediction for one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePrediction {
    pub service_id: String,
    /// Probability the service degrades within the horizon
    pub probability: f64,
    /// Unix seconds
    pub predicted_time: i64,
    pub recommended_action: Action,
    /// max(p, 1 - p)
    pub confidence: f64,
    /// Normalized importance per feature name; explanatory only
    pub feature_importances: BTreeMap<String, f64>,
    /// Verdict of the anomaly detector on the same snapshot
    pub anomalous: bool,
    pub model_version: String,
}

/// Why a remediation was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTrigger {
    PredictedFailure,
    Anomaly,
}

impl RepairTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairTrigger::PredictedFailure => "predicted_failure",
            RepairTrigger::Anomaly => "anomaly",
        }
    }
}

/// Audit record of an executed action and its measured outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAction {
    pub timestamp: i64,
    pub service_id: String,
    pub action: Action,
    pub trigger: RepairTrigger,
    pub metrics_before: MetricSnapshot,
    pub metrics_after: Option<MetricSnapshot>,
    pub success: bool,
    pub reward: f64,
}

/// Kind of observed degradation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unhealthy,
    Down,
    Restarted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Unhealthy => "unhealthy",
            FailureKind::Down => "down",
            FailureKind::Restarted => "restarted",
        }
    }
}

/// Degradation observed in the ingested metric stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub timestamp: i64,
    pub service_id: String,
    pub kind: FailureKind,
    pub restart_count: u64,
}

impl FailureEvent {
    /// Derive a failure event from a new snapshot and the previous one for
    /// the same service, if the new one shows degradation
    pub fn observe(current: &MetricSnapshot, previous: Option<&MetricSnapshot>) -> Option<Self> {
        let restarted = previous
            .map(|p| current.restart_count > p.restart_count)
            .unwrap_or(false);

        let kind = match current.health_status {
            HealthStatus::Down => FailureKind::Down,
            HealthStatus::Unhealthy => FailureKind::Unhealthy,
            _ if restarted => FailureKind::Restarted,
            _ => return None,
        };

        Some(Self {
            timestamp: current.timestamp,
            service_id: current.service_id.clone(),
            kind,
            restart_count: current.restart_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricSnapshot {
        MetricSnapshot {
            timestamp: 1_700_000_000,
            service_id: "api".to_string(),
            cpu_usage: 0.4,
            memory_usage: 0.5,
            disk_usage: 0.2,
            network_error_rate: 0.0,
            restart_count: 2,
            health_status: HealthStatus::Healthy,
            p95_response_time: 0.12,
            error_rate: 0.01,
            request_rate: 40.0,
        }
    }

    #[test]
    fn test_valid_snapshot_passes() {
        assert!(snapshot().validate().is_ok());
        assert!(MetricSnapshot::unavailable("api", 0).validate().is_ok());
    }

    #[test]
    fn test_missing_service_rejected() {
        let mut s = snapshot();
        s.service_id = "  ".to_string();
        assert!(matches!(s.validate(), Err(SnapshotError::MissingServiceId)));
    }

    #[test]
    fn test_out_of_range_and_nan_rejected() {
        let mut s = snapshot();
        s.cpu_usage = 1.5;
        assert!(matches!(
            s.validate(),
            Err(SnapshotError::OutOfRange { field: "cpu_usage", .. })
        ));

        let mut s = snapshot();
        s.p95_response_time = f64::NAN;
        assert!(matches!(
            s.validate(),
            Err(SnapshotError::NonFinite { field: "p95_response_time" })
        ));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["health_status"], "healthy");

        let mut raw = json.clone();
        raw.as_object_mut().unwrap().remove("cpu_usage");
        assert!(serde_json::from_value::<MetricSnapshot>(raw).is_err());
    }

    #[test]
    fn test_action_order_and_parse() {
        assert_eq!(Action::ALL[0], Action::Restart);
        assert_eq!(Action::ALL[6], Action::NoAction);
        for action in Action::ALL {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::parse("reboot"), None);
    }

    #[test]
    fn test_failure_event_detection() {
        let prev = snapshot();
        let mut cur = snapshot();
        assert!(FailureEvent::observe(&cur, Some(&prev)).is_none());

        cur.restart_count = 3;
        let event = FailureEvent::observe(&cur, Some(&prev)).unwrap();
        assert_eq!(event.kind, FailureKind::Restarted);

        cur.health_status = HealthStatus::Down;
        let event = FailureEvent::observe(&cur, None).unwrap();
        assert_eq!(event.kind, FailureKind::Down);
    }

    #[test]
    fn test_health_parse() {
        assert_eq!(HealthStatus::parse("Unhealthy"), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::parse(""), HealthStatus::Unknown);
        assert_eq!(HealthStatus::parse("starting"), HealthStatus::Unknown);
    }
}
