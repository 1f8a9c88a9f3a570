//! Thompson Sampling over Beta posteriors

use rand::Rng;
use std::collections::HashSet;

use super::sampler::sample_beta;
use crate::error::{EngineError, Result};
use crate::types::Posterior;

/// Reject empty and duplicated candidate lists
pub fn validate_candidates(candidates: &[String]) -> Result<()> {
    if candidates.is_empty() {
        return Err(EngineError::InvalidArgument("candidate list is empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(candidates.len());
    for id in candidates {
        if !seen.insert(id.as_str()) {
            return Err(EngineError::InvalidArgument(format!("duplicate candidate: {}", id)));
        }
    }
    Ok(())
}

/// Index of the maximum score; ties go to the earliest entry
pub(crate) fn argmax(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Draw one Beta sample per posterior and return the index of the largest
pub fn thompson_select<R: Rng + ?Sized>(rng: &mut R, posteriors: &[Posterior]) -> Result<usize> {
    if posteriors.is_empty() {
        return Err(EngineError::InvalidArgument("candidate list is empty".to_string()));
    }

    let samples = posteriors
        .iter()
        .map(|p| sample_beta(rng, p.alpha, p.beta))
        .collect::<Result<Vec<f64>>>()?;

    argmax(&samples).ok_or_else(|| EngineError::StatisticalUndefined("no comparable sample".to_string()))
}
