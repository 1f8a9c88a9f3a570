//! Contextual selection
//!
//! Two selectors live here. [`heuristic_select`] scores every candidate as
//! `mean(features) + rate * sqrt(len(features))`, which gives all candidates
//! the same score, so it always returns the first one. [`LinUcb`] keeps a
//! per-variant ridge regression and does discriminate by history.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::thompson::argmax;
use crate::error::{EngineError, Result};

/// Score shared by every candidate under the heuristic
pub fn heuristic_score(features: &[f64], exploration_rate: f64) -> f64 {
    if features.is_empty() {
        return 0.0;
    }
    let mean = features.iter().sum::<f64>() / features.len() as f64;
    mean + exploration_rate * (features.len() as f64).sqrt()
}

/// Heuristic contextual pick. Returns an index into the candidate list.
pub fn heuristic_select(candidate_count: usize, features: &[f64], exploration_rate: f64) -> Result<usize> {
    if candidate_count == 0 {
        return Err(EngineError::InvalidArgument("candidate list is empty".to_string()));
    }
    if features.iter().any(|f| !f.is_finite()) {
        return Err(EngineError::InvalidArgument("feature vector contains a non-finite value".to_string()));
    }
    let score = heuristic_score(features, exploration_rate);
    let scores = vec![score; candidate_count];
    argmax(&scores).ok_or_else(|| EngineError::StatisticalUndefined("no comparable score".to_string()))
}

/// Ridge-regression state for one arm
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArmState {
    /// Inverse of A = I + sum(x xᵀ), kept up to date with Sherman–Morrison
    a_inv: Vec<Vec<f64>>,
    /// sum(reward * x)
    b: Vec<f64>,
    observations: u64,
}

impl ArmState {
    fn new(dimension: usize) -> Self {
        let a_inv = (0..dimension)
            .map(|i| (0..dimension).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { a_inv, b: vec![0.0; dimension], observations: 0 }
    }

    fn a_inv_times(&self, x: &[f64]) -> Vec<f64> {
        self.a_inv.iter().map(|row| dot(row, x)).collect()
    }

    fn theta(&self) -> Vec<f64> {
        self.a_inv_times(&self.b)
    }

    fn score(&self, x: &[f64], alpha: f64) -> f64 {
        let a_inv_x = self.a_inv_times(x);
        let width = dot(x, &a_inv_x).max(0.0).sqrt();
        dot(&self.theta(), x) + alpha * width
    }

    fn update(&mut self, x: &[f64], reward: f64) {
        let a_inv_x = self.a_inv_times(x);
        let denom = 1.0 + dot(x, &a_inv_x);
        // A⁻¹ is symmetric, so xᵀA⁻¹ equals (A⁻¹x)ᵀ
        for (i, row) in self.a_inv.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell -= a_inv_x[i] * a_inv_x[j] / denom;
            }
        }
        for (bi, xi) in self.b.iter_mut().zip(x) {
            *bi += reward * xi;
        }
        self.observations += 1;
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Per-variant LinUCB
#[derive(Debug, Clone, Default)]
pub struct LinUcb {
    dimension: Option<usize>,
    arms: HashMap<String, ArmState>,
}

impl LinUcb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feature dimension, fixed by the first recorded observation
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of observations folded into an arm
    pub fn observations(&self, variant_id: &str) -> u64 {
        self.arms.get(variant_id).map_or(0, |arm| arm.observations)
    }

    /// Reject empty, non-finite or wrongly sized feature vectors
    pub fn check_features(&self, features: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(EngineError::InvalidArgument("feature vector is empty".to_string()));
        }
        if features.iter().any(|f| !f.is_finite()) {
            return Err(EngineError::InvalidArgument("feature vector contains a non-finite value".to_string()));
        }
        match self.dimension {
            Some(d) if d != features.len() => Err(EngineError::InvalidArgument(format!(
                "expected {} features, got {}",
                d,
                features.len()
            ))),
            _ => Ok(()),
        }
    }

    /// Upper confidence score for one arm; unseen arms score by width alone
    pub fn score(&self, variant_id: &str, features: &[f64], alpha: f64) -> Result<f64> {
        self.check_features(features)?;
        let score = match self.arms.get(variant_id) {
            Some(arm) => arm.score(features, alpha),
            None => alpha * dot(features, features).sqrt(),
        };
        Ok(score)
    }

    /// Index of the candidate with the highest upper confidence bound
    pub fn select(&self, candidates: &[String], features: &[f64], alpha: f64) -> Result<usize> {
        if candidates.is_empty() {
            return Err(EngineError::InvalidArgument("candidate list is empty".to_string()));
        }
        let scores = candidates
            .iter()
            .map(|id| self.score(id, features, alpha))
            .collect::<Result<Vec<f64>>>()?;
        argmax(&scores).ok_or_else(|| EngineError::StatisticalUndefined("no comparable score".to_string()))
    }

    /// Fold one (features, reward) observation into an arm
    pub fn update(&mut self, variant_id: &str, features: &[f64], reward: f64) -> Result<()> {
        self.check_features(features)?;
        if !reward.is_finite() {
            return Err(EngineError::InvalidArgument(format!("reward must be finite, got {}", reward)));
        }
        let dimension = *self.dimension.get_or_insert(features.len());
        self.arms
            .entry(variant_id.to_string())
            .or_insert_with(|| ArmState::new(dimension))
            .update(features, reward);
        Ok(())
    }

    /// Drop an arm, e.g. after its variant was pruned
    pub fn forget(&mut self, variant_id: &str) {
        self.arms.remove(variant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_heuristic_score() {
        let score = heuristic_score(&[0.2, 0.4, 0.6, 0.8], 1.0);
        assert!((score - (0.5 + 2.0)).abs() < 1e-12);
        assert_eq!(heuristic_score(&[], 1.0), 0.0);
    }

    #[test]
    fn test_heuristic_picks_first_candidate() {
        for rate in [0.05, 1.0, 3.0] {
            assert_eq!(heuristic_select(4, &[0.3, 0.9], rate).unwrap(), 0);
        }
        assert!(heuristic_select(0, &[1.0], 1.0).is_err());
        assert!(heuristic_select(2, &[f64::NAN], 1.0).is_err());
    }

    #[test]
    fn test_linucb_learns_context_dependent_arm() {
        let mut model = LinUcb::new();
        let morning = [1.0, 0.0];
        let evening = [0.0, 1.0];
        for _ in 0..30 {
            model.update("formal", &morning, 1.0).unwrap();
            model.update("formal", &evening, 0.0).unwrap();
            model.update("casual", &morning, 0.0).unwrap();
            model.update("casual", &evening, 1.0).unwrap();
        }
        let candidates = ids(&["formal", "casual"]);
        assert_eq!(model.select(&candidates, &morning, 0.1).unwrap(), 0);
        assert_eq!(model.select(&candidates, &evening, 0.1).unwrap(), 1);
        assert_eq!(model.observations("formal"), 60);
    }

    #[test]
    fn test_linucb_unseen_arm_gets_exploration_bonus() {
        let mut model = LinUcb::new();
        for _ in 0..50 {
            model.update("tried", &[1.0, 1.0], 0.1).unwrap();
        }
        let candidates = ids(&["tried", "fresh"]);
        assert_eq!(model.select(&candidates, &[1.0, 1.0], 1.0).unwrap(), 1);
    }

    #[test]
    fn test_linucb_sherman_morrison_matches_closed_form() {
        // one observation x: A = I + x xᵀ, A⁻¹ = I - x xᵀ / (1 + |x|²)
        let mut model = LinUcb::new();
        let x = [1.0, 2.0];
        model.update("v", &x, 1.0).unwrap();
        let arm = &model.arms["v"];
        let norm = 1.0 + 5.0;
        assert!((arm.a_inv[0][0] - (1.0 - 1.0 / norm)).abs() < 1e-12);
        assert!((arm.a_inv[0][1] - (-2.0 / norm)).abs() < 1e-12);
        assert!((arm.a_inv[1][1] - (1.0 - 4.0 / norm)).abs() < 1e-12);
    }

    #[test]
    fn test_linucb_dimension_is_fixed() {
        let mut model = LinUcb::new();
        model.update("v", &[1.0, 0.0, 0.5], 1.0).unwrap();
        assert_eq!(model.dimension(), Some(3));
        assert!(matches!(model.update("v", &[1.0], 1.0), Err(EngineError::InvalidArgument(_))));
        assert!(model.select(&ids(&["v"]), &[1.0, 0.0], 1.0).is_err());
        assert!(model.update("v", &[], 1.0).is_err());
    }

    #[test]
    fn test_forget_resets_arm() {
        let mut model = LinUcb::new();
        model.update("v", &[1.0], 1.0).unwrap();
        model.forget("v");
        assert_eq!(model.observations("v"), 0);
    }
}
