//! Rolling window of metric snapshots
//!
//! A FIFO ring buffer holding the most recent snapshots across all
//! services. The oldest entry is evicted once capacity is reached.
//! Malformed snapshots are rejected before they touch the buffer.

use crate::error::SnapshotError;
use crate::models::MetricSnapshot;
use std::collections::VecDeque;
use tracing::debug;

/// Default maximum number of snapshots kept in memory
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Configuration for the metrics store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries in the window
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Bounded history of snapshots, oldest first
#[derive(Debug)]
pub struct MetricsStore {
    buffer: VecDeque<MetricSnapshot>,
    capacity: usize,
    /// Accepted snapshots since creation; keeps counting after saturation
    total_ingested: u64,
    rejected: u64,
}

impl MetricsStore {
    /// Create a store holding at most `capacity` snapshots
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            total_ingested: 0,
            rejected: 0,
        }
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Validate and append a snapshot, evicting the oldest on overflow
    pub fn append(&mut self, snapshot: MetricSnapshot) -> Result<(), SnapshotError> {
        if let Err(e) = snapshot.validate() {
            self.rejected += 1;
            debug!(service = %snapshot.service_id, error = %e, "Rejected snapshot");
            return Err(e);
        }

        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(snapshot);
        self.total_ingested += 1;
        Ok(())
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MetricSnapshot> + ExactSizeIterator {
        self.buffer.iter()
    }

    /// Copy of the current window, oldest to newest
    pub fn to_vec(&self) -> Vec<MetricSnapshot> {
        self.buffer.iter().cloned().collect()
    }

    /// Newest stored snapshot for a service
    pub fn latest_for(&self, service_id: &str) -> Option<&MetricSnapshot> {
        self.buffer.iter().rev().find(|s| s.service_id == service_id)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_ingested(&self) -> u64 {
        self.total_ingested
    }

    /// Get statistics about the store
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.buffer.len(),
            capacity: self.capacity,
            total_ingested: self.total_ingested,
            rejected: self.rejected,
            oldest_timestamp: self.buffer.front().map(|s| s.timestamp),
            newest_timestamp: self.buffer.back().map(|s| s.timestamp),
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub entries: usize,
    pub capacity: usize,
    pub total_ingested: u64,
    pub rejected: u64,
    /// Unix seconds
    pub oldest_timestamp: Option<i64>,
    /// Unix seconds
    pub newest_timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;

    fn create_snapshot(service: &str, ts: i64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: ts,
            service_id: service.to_string(),
            cpu_usage: 0.3,
            memory_usage: 0.4,
            disk_usage: 0.5,
            network_error_rate: 0.0,
            restart_count: 0,
            health_status: HealthStatus::Healthy,
            p95_response_time: 0.2,
            error_rate: 0.0,
            request_rate: 10.0,
        }
    }

    #[test]
    fn test_append_and_iterate_in_order() {
        let mut store = MetricsStore::new(10);
        for ts in 0..3 {
            store.append(create_snapshot("api", ts)).unwrap();
        }
        let ts: Vec<i64> = store.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![0, 1, 2]);
    }

    #[test]
    fn test_capacity_plus_one_evicts_earliest() {
        let capacity = 5;
        let mut store = MetricsStore::new(capacity);
        for ts in 0..=capacity as i64 {
            store.append(create_snapshot("api", ts)).unwrap();
        }

        assert_eq!(store.len(), capacity);
        assert!(store.iter().all(|s| s.timestamp != 0));
        assert_eq!(store.iter().next().unwrap().timestamp, 1);
        assert_eq!(store.iter().last().unwrap().timestamp, capacity as i64);
        assert_eq!(store.total_ingested(), capacity as u64 + 1);
    }

    #[test]
    fn test_malformed_snapshot_leaves_buffer_intact() {
        let mut store = MetricsStore::new(3);
        store.append(create_snapshot("api", 1)).unwrap();

        let mut bad = create_snapshot("", 2);
        bad.cpu_usage = 0.5;
        assert!(store.append(bad).is_err());

        let mut bad = create_snapshot("api", 3);
        bad.memory_usage = f64::INFINITY;
        assert!(store.append(bad).is_err());

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_ingested(), 1);
        assert_eq!(store.stats().rejected, 2);
    }

    #[test]
    fn test_latest_for_service() {
        let mut store = MetricsStore::new(10);
        store.append(create_snapshot("api", 1)).unwrap();
        store.append(create_snapshot("db", 2)).unwrap();
        store.append(create_snapshot("api", 3)).unwrap();

        assert_eq!(store.latest_for("api").unwrap().timestamp, 3);
        assert_eq!(store.latest_for("db").unwrap().timestamp, 2);
        assert!(store.latest_for("cache").is_none());
    }

    #[test]
    fn test_stats() {
        let mut store = MetricsStore::new(100);
        for ts in 10..15 {
            store.append(create_snapshot("api", ts)).unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.oldest_timestamp, Some(10));
        assert_eq!(stats.newest_timestamp, Some(14));
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.capacity, 10_000);
        assert_eq!(MetricsStore::with_config(&config).capacity(), 10_000);
    }
}
