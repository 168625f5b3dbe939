//! Remediation policy
//!
//! Snapshots are bucketed into a coarse state, an epsilon-greedy learner
//! chooses among the fixed action set, and the measured outcome of each
//! action is scored by the reward model and fed back into the Q-table.

mod engine;
mod reward;
mod state;

pub use engine::{PolicyConfig, PolicyEngine, QEntry, QTable, DEFAULT_EPSILON, DEFAULT_LEARNING_RATE};
pub use reward::{calculate_reward, RewardModel, RewardWeights};
pub use state::{DiscretizedState, HealthBucket, UsageLevel};
