//! Feature extraction for failure prediction
//!
//! Projects a single snapshot onto a fixed 9-dimensional vector. The
//! projection is pure: the same snapshot always yields the same vector, and
//! values that could not be collected (NaN, infinities) become 0.0 so that
//! scoring keeps running on partial data.

use crate::models::{FeatureVector, HealthStatus, MetricSnapshot, NUM_FEATURES};

/// Stateless snapshot-to-vector projection
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, snapshot: &MetricSnapshot) -> FeatureVector {
        let health = if snapshot.health_status == HealthStatus::Unhealthy {
            1.0
        } else {
            0.0
        };

        let raw: [f64; NUM_FEATURES] = [
            snapshot.cpu_usage,
            snapshot.memory_usage,
            snapshot.disk_usage,
            snapshot.network_error_rate,
            snapshot.restart_count as f64,
            health,
            snapshot.p95_response_time,
            snapshot.error_rate,
            snapshot.request_rate,
        ];

        FeatureVector(raw.map(sanitize))
    }

    pub fn extract_all<'a, I>(&self, snapshots: I) -> Vec<FeatureVector>
    where
        I: IntoIterator<Item = &'a MetricSnapshot>,
    {
        snapshots.into_iter().map(|s| self.extract(s)).collect()
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_snapshot() -> MetricSnapshot {
        MetricSnapshot {
            timestamp: 1_700_000_000,
            service_id: "api".to_string(),
            cpu_usage: 0.61,
            memory_usage: 0.42,
            disk_usage: 0.3,
            network_error_rate: 1.5,
            restart_count: 3,
            health_status: HealthStatus::Unhealthy,
            p95_response_time: 0.25,
            error_rate: 0.02,
            request_rate: 120.0,
        }
    }

    #[test]
    fn test_extract_is_deterministic_and_nine_wide() {
        let extractor = FeatureExtractor::new();
        let snapshot = create_snapshot();
        let a = extractor.extract(&snapshot);
        let b = extractor.extract(&snapshot);
        assert_eq!(a, b);
        assert_eq!(a.as_slice().len(), 9);
    }

    #[test]
    fn test_feature_order() {
        let f = FeatureExtractor::new().extract(&create_snapshot());
        assert_eq!(
            f.0,
            [0.61, 0.42, 0.3, 1.5, 3.0, 1.0, 0.25, 0.02, 120.0]
        );
    }

    #[test]
    fn test_health_binarized() {
        let extractor = FeatureExtractor::new();
        let mut s = create_snapshot();
        for status in [HealthStatus::Healthy, HealthStatus::Unknown, HealthStatus::Down] {
            s.health_status = status;
            assert_eq!(extractor.extract(&s).0[5], 0.0);
        }
    }

    #[test]
    fn test_missing_values_map_to_zero() {
        let mut s = create_snapshot();
        s.cpu_usage = f64::NAN;
        s.request_rate = f64::INFINITY;
        let f = FeatureExtractor::new().extract(&s);
        assert_eq!(f.0[0], 0.0);
        assert_eq!(f.0[8], 0.0);
        assert_eq!(f.as_slice().len(), 9);
    }

    #[test]
    fn test_unavailable_snapshot_is_all_zero() {
        let f = FeatureExtractor::new().extract(&MetricSnapshot::unavailable("api", 0));
        assert!(f.0.iter().all(|v| *v == 0.0));
    }
}
