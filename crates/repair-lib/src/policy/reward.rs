//! Reward shaping for executed actions

use crate::models::{HealthStatus, MetricSnapshot};

/// Coefficients of the reward function
#[derive(Debug, Clone)]
pub struct RewardWeights {
    /// Reward for an action the executor reported as failed
    pub failure_penalty: f64,
    pub cpu_improvement: f64,
    pub memory_improvement: f64,
    pub error_rate_improvement: f64,
    pub response_time_improvement: f64,
    pub cpu_regression_penalty: f64,
    pub memory_regression_penalty: f64,
    pub healthy_bonus: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            failure_penalty: -10.0,
            cpu_improvement: 5.0,
            memory_improvement: 5.0,
            error_rate_improvement: 10.0,
            response_time_improvement: 3.0,
            cpu_regression_penalty: 3.0,
            memory_regression_penalty: 3.0,
            healthy_bonus: 5.0,
        }
    }
}

/// Scores an action from its before/after metrics
#[derive(Debug, Clone, Default)]
pub struct RewardModel {
    weights: RewardWeights,
}

impl RewardModel {
    pub fn new(weights: RewardWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    pub fn reward(
        &self,
        before: &MetricSnapshot,
        after: Option<&MetricSnapshot>,
        success: bool,
    ) -> f64 {
        let w = &self.weights;
        if !success {
            return w.failure_penalty;
        }
        let Some(after) = after else {
            return 0.0;
        };

        let mut reward = 0.0;
        reward += w.cpu_improvement * (before.cpu_usage - after.cpu_usage).max(0.0);
        reward += w.memory_improvement * (before.memory_usage - after.memory_usage).max(0.0);
        reward += w.error_rate_improvement * (before.error_rate - after.error_rate).max(0.0);
        reward += w.response_time_improvement
            * (before.p95_response_time - after.p95_response_time).max(0.0);

        if after.cpu_usage > before.cpu_usage {
            reward -= w.cpu_regression_penalty;
        }
        if after.memory_usage > before.memory_usage {
            reward -= w.memory_regression_penalty;
        }
        if after.health_status == HealthStatus::Healthy {
            reward += w.healthy_bonus;
        }

        reward
    }
}

/// Reward under the default weights
pub fn calculate_reward(
    before: &MetricSnapshot,
    after: Option<&MetricSnapshot>,
    success: bool,
) -> f64 {
    RewardModel::default().reward(before, after, success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, mem: f64, err: f64, resp: f64, health: HealthStatus) -> MetricSnapshot {
        let mut s = MetricSnapshot::unavailable("api", 0);
        s.cpu_usage = cpu;
        s.memory_usage = mem;
        s.error_rate = err;
        s.p95_response_time = resp;
        s.health_status = health;
        s
    }

    #[test]
    fn test_failure_is_flat_penalty() {
        let before = snapshot(0.9, 0.9, 0.5, 2.0, HealthStatus::Unhealthy);
        let after = snapshot(0.1, 0.1, 0.0, 0.1, HealthStatus::Healthy);
        assert_eq!(calculate_reward(&before, Some(&after), false), -10.0);
        assert_eq!(calculate_reward(&before, None, false), -10.0);
    }

    #[test]
    fn test_missing_after_is_zero() {
        let before = snapshot(0.9, 0.9, 0.5, 2.0, HealthStatus::Unhealthy);
        assert_eq!(calculate_reward(&before, None, true), 0.0);
    }

    #[test]
    fn test_improvement_terms() {
        let before = snapshot(0.9, 0.8, 0.3, 1.0, HealthStatus::Unhealthy);
        let after = snapshot(0.4, 0.6, 0.1, 0.5, HealthStatus::Healthy);
        // 5*0.5 + 5*0.2 + 10*0.2 + 3*0.5 + 5
        let expected = 2.5 + 1.0 + 2.0 + 1.5 + 5.0;
        let r = calculate_reward(&before, Some(&after), true);
        assert!((r - expected).abs() < 1e-9, "reward was {}", r);
    }

    #[test]
    fn test_regression_penalties() {
        let before = snapshot(0.3, 0.3, 0.0, 0.2, HealthStatus::Healthy);
        let after = snapshot(0.5, 0.6, 0.0, 0.2, HealthStatus::Unhealthy);
        assert_eq!(calculate_reward(&before, Some(&after), true), -6.0);
    }

    #[test]
    fn test_unchanged_healthy_gets_bonus_only() {
        let s = snapshot(0.5, 0.5, 0.1, 0.3, HealthStatus::Healthy);
        assert_eq!(calculate_reward(&s, Some(&s), true), 5.0);

        let down = snapshot(0.5, 0.5, 0.1, 0.3, HealthStatus::Down);
        assert_eq!(calculate_reward(&down, Some(&down), true), 0.0);
    }
}
