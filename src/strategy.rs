//! Swappable reward and context strategies
//!
//! A [`RewardFunction`] turns a raw task outcome into the scalar reward stored
//! in feedback; a [`ContextExtractor`] turns task text into the feature vector
//! the contextual selectors consume.

use crate::types::TaskOutcome;

/// Maps a task outcome to a reward
pub trait RewardFunction: Send + Sync {
    fn reward(&self, outcome: &TaskOutcome) -> f64;
}

/// Maps task text to a feature vector of fixed length
pub trait ContextExtractor: Send + Sync {
    fn extract(&self, task: &str) -> Vec<f64>;
}

/// 1.0 on success, 0.0 otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessReward;

impl RewardFunction for SuccessReward {
    fn reward(&self, outcome: &TaskOutcome) -> f64 {
        if outcome.success { 1.0 } else { 0.0 }
    }
}

/// Success minus weighted latency and token cost, clamped to [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct CostAwareReward {
    /// Penalty per second of latency
    pub latency_weight: f64,
    /// Penalty per 1000 tokens
    pub cost_weight: f64,
}

impl Default for CostAwareReward {
    fn default() -> Self {
        Self { latency_weight: 0.05, cost_weight: 0.1 }
    }
}

impl RewardFunction for CostAwareReward {
    fn reward(&self, outcome: &TaskOutcome) -> f64 {
        let base = if outcome.success { 1.0 } else { 0.0 };
        let penalty = self.latency_weight * outcome.latency_ms / 1000.0
            + self.cost_weight * outcome.token_cost / 1000.0;
        (base - penalty).clamp(0.0, 1.0)
    }
}

/// Cheap shape features of the task text
///
/// `[length / 1000 (capped at 1), words / 200 (capped at 1), has question,
/// has code fence, lines / 50 (capped at 1)]`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextShapeExtractor;

/// Length of the vector produced by [`TextShapeExtractor`]
pub const TEXT_SHAPE_FEATURES: usize = 5;

impl ContextExtractor for TextShapeExtractor {
    fn extract(&self, task: &str) -> Vec<f64> {
        let chars = task.chars().count() as f64;
        let words = task.split_whitespace().count() as f64;
        let lines = task.lines().count() as f64;
        vec![
            (chars / 1000.0).min(1.0),
            (words / 200.0).min(1.0),
            if task.contains('?') { 1.0 } else { 0.0 },
            if task.contains("```") { 1.0 } else { 0.0 },
            (lines / 50.0).min(1.0),
        ]
    }
}
