//! Anomaly detection over service feature vectors
//!
//! An isolation forest trained on the same scaled features as the failure
//! classifier flags snapshots that look unlike the recent window, at a
//! configurable expected anomaly rate.

mod isolation_forest;

pub use isolation_forest::{AnomalyDetector, IsolationParams, DEFAULT_CONTAMINATION};
