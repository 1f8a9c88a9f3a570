//! Monte-Carlo A/B significance test
//!
//! Estimates P(A beats B) by drawing paired Beta samples. The trial count is
//! the only precision control; two runs over the same posteriors can differ
//! slightly.

use rand::Rng;
use tracing::debug;

use super::sampler::sample_beta;
use crate::error::{EngineError, Result};
use crate::types::{AbTestResult, Posterior};

/// Default number of paired draws
pub const DEFAULT_TRIALS: u32 = 10_000;
/// Confidence a side must exceed to be declared the winner
pub const DEFAULT_SIGNIFICANCE: f64 = 0.95;

/// Compare two posteriors
pub fn ab_test<R: Rng + ?Sized>(
    rng: &mut R,
    a: &Posterior,
    b: &Posterior,
    trials: u32,
    significance: f64,
) -> Result<AbTestResult> {
    if trials == 0 {
        return Err(EngineError::InvalidArgument("trial count must be positive".to_string()));
    }

    let mut wins_a: u32 = 0;
    for _ in 0..trials {
        let sample_a = sample_beta(rng, a.alpha, a.beta)?;
        let sample_b = sample_beta(rng, b.alpha, b.beta)?;
        if sample_a > sample_b {
            wins_a += 1;
        }
    }

    let p = wins_a as f64 / trials as f64;
    let confidence = p.max(1.0 - p);
    let p_value = 2.0 * p.min(1.0 - p);

    let winner = if confidence > significance {
        Some(if p > 0.5 { a.variant_id.clone() } else { b.variant_id.clone() })
    } else {
        None
    };

    debug!(
        "A/B {} vs {}: P(A>B)={:.4}, confidence={:.4}, winner={:?}",
        a.variant_id, b.variant_id, p, confidence, winner
    );

    Ok(AbTestResult { winner, confidence, p_value })
}
