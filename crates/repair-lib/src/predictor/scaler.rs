//! Per-feature standardisation fitted on the training window

use crate::models::{FeatureVector, NUM_FEATURES};
use serde::{Deserialize, Serialize};

/// Zero-mean, unit-variance scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    mean: [f64; NUM_FEATURES],
    scale: [f64; NUM_FEATURES],
}

impl FeatureScaler {
    /// Fit on a set of vectors. Returns `None` for an empty set.
    ///
    /// Constant features get a scale of 1.0 so they pass through centred.
    pub fn fit(samples: &[FeatureVector]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;

        let mut mean = [0.0; NUM_FEATURES];
        for s in samples {
            for (m, v) in mean.iter_mut().zip(s.0.iter()) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = [0.0; NUM_FEATURES];
        for s in samples {
            for ((acc, v), m) in var.iter_mut().zip(s.0.iter()).zip(mean.iter()) {
                *acc += (v - m).powi(2);
            }
        }

        // Population variance, as in most standard scalers
        let scale = var.map(|v| {
            let std = (v / n).sqrt();
            if std < f64::EPSILON {
                1.0
            } else {
                std
            }
        });

        Some(Self { mean, scale })
    }

    pub fn transform(&self, features: &FeatureVector) -> FeatureVector {
        let mut out = [0.0; NUM_FEATURES];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (features.0[i] - self.mean[i]) / self.scale[i];
        }
        FeatureVector(out)
    }

    pub fn transform_all(&self, samples: &[FeatureVector]) -> Vec<FeatureVector> {
        samples.iter().map(|s| self.transform(s)).collect()
    }

    pub fn mean(&self) -> &[f64; NUM_FEATURES] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64; NUM_FEATURES] {
        &self.scale
    }
}
