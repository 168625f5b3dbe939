//! Failure prediction
//!
//! Snapshot featurisation, feature scaling and the supervised random-forest
//! classifier that estimates the probability of a service degrading within
//! the prediction horizon.

mod classifier;
mod features;
mod forest;
mod scaler;

pub use classifier::{
    estimate_time_to_failure, label_window, predicted_failure_time, FailureClassifier,
    DEFAULT_HORIZON,
};
pub use features::FeatureExtractor;
pub use forest::{DecisionTree, ForestParams, RandomForest};
pub use scaler::FeatureScaler;
