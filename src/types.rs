//! Shared types used across modules
//!
//! Records mirror the persisted tables: variants, their posteriors, and the
//! append-only feedback, preference and contextual-observation logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prior pseudo-count for successes on a fresh posterior
pub const DEFAULT_PRIOR_ALPHA: f64 = 1.0;
/// Prior pseudo-count for failures on a fresh posterior
pub const DEFAULT_PRIOR_BETA: f64 = 1.0;

/// A competing template. Content is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub content: String,
    /// Lineage only; the parent may already have been pruned
    pub parent_id: Option<String>,
    pub generation: u32,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Create a new variant with a fresh id
    pub fn new(content: impl Into<String>, parent_id: Option<String>, generation: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            parent_id,
            generation,
            created_at: Utc::now(),
        }
    }
}

/// Which pseudo-count a boost applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosteriorField {
    Alpha,
    Beta,
}

impl std::fmt::Display for PosteriorField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PosteriorField::Alpha => write!(f, "alpha"),
            PosteriorField::Beta => write!(f, "beta"),
        }
    }
}

/// Beta posterior over a variant's success rate, plus running averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub variant_id: String,
    pub alpha: f64,
    pub beta: f64,
    /// Number of feedback events folded into the averages. Preference boosts
    /// move alpha/beta without touching this, so it is not alpha + beta - 2.
    pub total_trials: u64,
    pub avg_reward: f64,
    pub avg_latency_ms: f64,
    pub avg_cost: f64,
}

impl Posterior {
    /// The uniform prior Beta(1, 1) with no trials
    pub fn prior(variant_id: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            alpha: DEFAULT_PRIOR_ALPHA,
            beta: DEFAULT_PRIOR_BETA,
            total_trials: 0,
            avg_reward: 0.0,
            avg_latency_ms: 0.0,
            avg_cost: 0.0,
        }
    }

    /// Posterior mean win rate: `alpha / (alpha + beta)`
    pub fn win_rate(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Fold one observation into the posterior and its running averages
    pub fn observe(&mut self, success: bool, reward: f64, latency_ms: f64, cost: f64) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        let n = self.total_trials as f64;
        self.avg_reward = (self.avg_reward * n + reward) / (n + 1.0);
        self.avg_latency_ms = (self.avg_latency_ms * n + latency_ms) / (n + 1.0);
        self.avg_cost = (self.avg_cost * n + cost) / (n + 1.0);
        self.total_trials += 1;
    }

    /// Add pseudo-counts without touching trials or averages
    pub fn boost(&mut self, field: PosteriorField, amount: f64) {
        match field {
            PosteriorField::Alpha => self.alpha += amount,
            PosteriorField::Beta => self.beta += amount,
        }
    }
}

/// One observed outcome for a variant. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub task_id: String,
    pub variant_id: String,
    pub reward: f64,
    pub latency_ms: f64,
    pub token_cost: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// A pairwise judgement between two variants. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceComparison {
    pub winner_id: String,
    pub loser_id: String,
    pub context: String,
    pub human_feedback: bool,
    pub timestamp: DateTime<Utc>,
}

/// A feature vector paired with the reward it produced for a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualObservation {
    pub variant_id: String,
    pub features: Vec<f64>,
    pub reward: f64,
    pub timestamp: DateTime<Utc>,
}

/// Raw outcome of running a task with a variant, before reward shaping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub latency_ms: f64,
    pub token_cost: f64,
}

/// Verdict of a Monte-Carlo A/B comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
    /// `None` when neither side clears the significance level
    pub winner: Option<String>,
    /// `max(p, 1 - p)` where p = P(A beats B)
    pub confidence: f64,
    pub p_value: f64,
}
