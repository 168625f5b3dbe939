//! Supervised failure classifier
//!
//! Labels each historical snapshot by whether the same service degraded
//! (unhealthy, or a restart) within the next `horizon` snapshots, then fits a
//! random forest on the scaled feature vectors.

use super::forest::{ForestParams, RandomForest};
use crate::models::{FeatureVector, MetricSnapshot, FEATURE_NAMES, NUM_FEATURES};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default number of future snapshots inspected for a label
pub const DEFAULT_HORIZON: usize = 5;

/// Reported time-to-failure when failure is unlikely
const DEFAULT_FAR_HORIZON_SECS: i64 = 24 * 60 * 60;

/// Label the window for supervised training.
///
/// Returns `(window_index, label)` pairs in window order. For every service
/// the newest `horizon` snapshots are dropped since their future is not yet
/// observed.
pub fn label_window(window: &[MetricSnapshot], horizon: usize) -> Vec<(usize, bool)> {
    let mut per_service: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, s) in window.iter().enumerate() {
        per_service.entry(s.service_id.as_str()).or_default().push(i);
    }

    let mut labels = Vec::new();
    for positions in per_service.values() {
        let labelable = positions.len().saturating_sub(horizon);
        for j in 0..labelable {
            let current = &window[positions[j]];
            let degraded = positions[j + 1..=j + horizon]
                .iter()
                .any(|&k| window[k].is_degraded_since(current));
            labels.push((positions[j], degraded));
        }
    }

    labels.sort_unstable_by_key(|(i, _)| *i);
    labels
}

/// Random-forest failure classifier operating on scaled features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureClassifier {
    forest: RandomForest,
    horizon: usize,
}

impl FailureClassifier {
    pub fn fit(
        x: &[FeatureVector],
        y: &[bool],
        horizon: usize,
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Self {
        let rows: Vec<[f64; NUM_FEATURES]> = x.iter().map(|f| f.0).collect();
        Self {
            forest: RandomForest::fit(&rows, y, params, rng),
            horizon,
        }
    }

    /// Probability of degradation within the horizon
    pub fn predict_proba(&self, scaled: &FeatureVector) -> f64 {
        self.forest.predict_proba(scaled.as_slice())
    }

    /// Importance per feature name, summing to 1
    pub fn feature_importances(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.forest.feature_importances().iter())
            .map(|(name, v)| (name.to_string(), *v))
            .collect()
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn n_trees(&self) -> usize {
        self.forest.n_trees()
    }
}

/// Rough seconds until failure from the current readings
pub fn estimate_time_to_failure(snapshot: &MetricSnapshot) -> i64 {
    if snapshot.cpu_usage > 0.9 {
        60
    } else if snapshot.cpu_usage > 0.8 {
        300
    } else if snapshot.memory_usage > 0.9 {
        120
    } else if snapshot.error_rate > 0.5 {
        180
    } else {
        600
    }
}

/// Predicted failure instant (Unix seconds) for a probability
pub fn predicted_failure_time(snapshot: &MetricSnapshot, probability: f64, now: i64) -> i64 {
    if probability > 0.5 {
        now + estimate_time_to_failure(snapshot)
    } else {
        now + DEFAULT_FAR_HORIZON_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;

    fn snap(service: &str, ts: i64, restarts: u64, health: HealthStatus) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: ts,
            service_id: service.to_string(),
            cpu_usage: 0.2,
            memory_usage: 0.3,
            disk_usage: 0.1,
            network_error_rate: 0.0,
            restart_count: restarts,
            health_status: health,
            p95_response_time: 0.1,
            error_rate: 0.0,
            request_rate: 5.0,
        }
    }

    #[test]
    fn test_label_excludes_last_horizon_per_service() {
        let window: Vec<_> = (0..10)
            .map(|i| snap("api", i, 0, HealthStatus::Healthy))
            .collect();
        let labels = label_window(&window, 5);
        assert_eq!(labels.len(), 5);
        assert!(labels.iter().all(|(_, l)| !l));
        assert_eq!(labels.last().unwrap().0, 4);
    }

    #[test]
    fn test_label_restart_increase() {
        let window: Vec<_> = (0..12)
            .map(|i| snap("api", i, if i >= 8 { 1 } else { 0 }, HealthStatus::Healthy))
            .collect();
        let labels: HashMap<usize, bool> = label_window(&window, 5).into_iter().collect();

        assert!(!labels[&2]);
        for i in 3..=6 {
            assert!(labels[&i], "index {} should see the restart", i);
        }
    }

    #[test]
    fn test_label_is_per_service() {
        // Interleave two services; only db turns unhealthy
        let mut window = Vec::new();
        for i in 0..10 {
            window.push(snap("api", i, 0, HealthStatus::Healthy));
            let health = if i == 6 {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            window.push(snap("db", i, 0, health));
        }
        let labels = label_window(&window, 5);

        for (idx, label) in labels {
            if window[idx].service_id == "api" {
                assert!(!label);
            } else if (1..=5).contains(&window[idx].timestamp) {
                assert!(label);
            }
        }
    }

    #[test]
    fn test_time_to_failure_heuristic() {
        let mut s = snap("api", 0, 0, HealthStatus::Healthy);
        assert_eq!(estimate_time_to_failure(&s), 600);
        s.error_rate = 0.6;
        assert_eq!(estimate_time_to_failure(&s), 180);
        s.memory_usage = 0.95;
        assert_eq!(estimate_time_to_failure(&s), 120);
        s.cpu_usage = 0.85;
        assert_eq!(estimate_time_to_failure(&s), 300);
        s.cpu_usage = 0.95;
        assert_eq!(estimate_time_to_failure(&s), 60);

        assert_eq!(predicted_failure_time(&s, 0.9, 1000), 1060);
        assert_eq!(predicted_failure_time(&s, 0.2, 1000), 1000 + 86_400);
    }
}
