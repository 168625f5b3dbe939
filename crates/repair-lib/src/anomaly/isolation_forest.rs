//! Isolation forest anomaly detection
//!
//! Anomalies are isolated in fewer random splits than normal points, so a
//! short average path length across random trees means an outlier. Scores
//! follow the usual normalisation `s = 2^(-E[h(x)] / c(psi))`; the decision
//! threshold is the training-score quantile matching the expected anomaly
//! rate.

use crate::models::{FeatureVector, NUM_FEATURES};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default expected fraction of anomalous samples
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Hyperparameters for the isolation forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationParams {
    pub n_trees: usize,
    /// Sub-sample size per tree (capped by the training set size)
    pub max_samples: usize,
    /// Expected anomaly rate, within (0, 0.5]
    pub contamination: f64,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: DEFAULT_CONTAMINATION,
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum INode {
    External {
        size: usize,
    },
    Internal {
        feature: usize,
        split: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<INode>,
}

impl IsolationTree {
    fn fit(rows: &[&[f64; NUM_FEATURES]], height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        rows: &[&[f64; NUM_FEATURES]],
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let node_id = self.nodes.len();
        self.nodes.push(INode::External { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return node_id;
        }

        // Only features with spread can isolate anything
        let splittable: Vec<(usize, f64, f64)> = (0..NUM_FEATURES)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
                    (lo.min(r[f]), hi.max(r[f]))
                });
                (hi - lo > f64::EPSILON).then_some((f, lo, hi))
            })
            .collect();

        if splittable.is_empty() {
            return node_id;
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let split = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<&[f64; NUM_FEATURES]>, Vec<&[f64; NUM_FEATURES]>) =
            rows.iter().partition(|r| r[feature] < split);

        let left = self.grow(&left_rows, depth + 1, height_limit, rng);
        let right = self.grow(&right_rows, depth + 1, height_limit, rng);
        self.nodes[node_id] = INode::Internal {
            feature,
            split,
            left,
            right,
        };
        node_id
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(idx) {
                Some(INode::External { size }) => return depth + average_path_length(*size),
                Some(INode::Internal {
                    feature,
                    split,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v < *split { *left } else { *right };
                    depth += 1.0;
                }
                None => return depth,
            }
        }
    }
}

/// Unsupervised outlier scorer over scaled feature vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetector {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    contamination: f64,
    threshold: f64,
}

impl AnomalyDetector {
    /// Fit on scaled vectors. Needs at least two samples to be meaningful;
    /// with fewer every score is 0.5 and nothing is flagged.
    pub fn fit(samples: &[FeatureVector], params: &IsolationParams, rng: &mut StdRng) -> Self {
        let contamination = params.contamination.clamp(f64::EPSILON, 0.5);
        let n = samples.len();
        let sample_size = params.max_samples.min(n).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let mut trees = Vec::with_capacity(params.n_trees);
        if n >= 2 {
            for _ in 0..params.n_trees.max(1) {
                let rows: Vec<&[f64; NUM_FEATURES]> = sample(rng, n, sample_size)
                    .into_iter()
                    .map(|i| &samples[i].0)
                    .collect();
                trees.push(IsolationTree::fit(&rows, height_limit, rng));
            }
        }

        let mut detector = Self {
            trees,
            sample_size,
            contamination,
            // Scores never exceed 1.0, so nothing is flagged until fitted
            threshold: 1.0,
        };

        if n >= 2 {
            let mut scores: Vec<f64> = samples.iter().map(|s| detector.score(s)).collect();
            scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            detector.threshold = quantile(&scores, 1.0 - contamination);
        }

        detector
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn score(&self, scaled: &FeatureVector) -> f64 {
        let c = average_path_length(self.sample_size);
        if self.trees.is_empty() || c <= 0.0 {
            return 0.5;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|t| t.path_length(scaled.as_slice()))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / c)
    }

    pub fn is_anomalous(&self, scaled: &FeatureVector) -> bool {
        self.score(scaled) > self.threshold
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 1.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn cluster(n: usize, rng: &mut StdRng) -> Vec<FeatureVector> {
        (0..n)
            .map(|_| {
                let mut raw = [0.0; NUM_FEATURES];
                for v in raw.iter_mut() {
                    *v = rng.gen_range(-0.5..0.5);
                }
                FeatureVector(raw)
            })
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.05);
    }

    #[test]
    fn test_quantile() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 1.0), 5.0);
        assert!((quantile(&v, 0.9) - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = cluster(300, &mut rng);
        let detector = AnomalyDetector::fit(&data, &IsolationParams::default(), &mut rng);

        let inlier = FeatureVector([0.0; NUM_FEATURES]);
        let outlier = FeatureVector([8.0; NUM_FEATURES]);
        assert!(detector.score(&outlier) > detector.score(&inlier));
        assert!(detector.is_anomalous(&outlier));
        assert!(!detector.is_anomalous(&inlier));
    }

    #[test]
    fn test_training_flag_rate_matches_contamination() {
        let mut rng = StdRng::seed_from_u64(5);
        let data = cluster(500, &mut rng);
        let detector = AnomalyDetector::fit(&data, &IsolationParams::default(), &mut rng);

        let flagged = data.iter().filter(|s| detector.is_anomalous(s)).count();
        let rate = flagged as f64 / data.len() as f64;
        assert!(rate > 0.05 && rate <= 0.11, "rate was {}", rate);
    }

    #[test]
    fn test_degenerate_training_set_flags_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let detector = AnomalyDetector::fit(
            &[FeatureVector([1.0; NUM_FEATURES])],
            &IsolationParams::default(),
            &mut rng,
        );
        assert_eq!(detector.score(&FeatureVector([9.0; NUM_FEATURES])), 0.5);
        assert!(!detector.is_anomalous(&FeatureVector([9.0; NUM_FEATURES])));
    }
}
