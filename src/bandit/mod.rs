//! Bandit machinery: samplers, selection policies and the A/B evaluator
//!
//! Everything here is pure with respect to storage. Callers fetch posteriors
//! first and hand them in together with a random source.

pub mod sampler;
pub mod thompson;
pub mod contextual;
pub mod evaluator;

pub use sampler::{sample_beta, sample_gamma, sample_normal, Sampler};
pub use thompson::{thompson_select, validate_candidates};
pub use contextual::{heuristic_score, heuristic_select, LinUcb};
pub use evaluator::ab_test;
