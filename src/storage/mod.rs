//! Durable storage for variants, posteriors and history
//!
//! The engine talks to an abstract relational store through [`Storage`].
//! [`SqliteStorage`] is the bundled implementation.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContextualObservation, FeedbackEvent, Posterior, PreferenceComparison, Variant};

pub use sqlite::SqliteStorage;

/// Table-structured store backing the engine
///
/// Writes that touch more than one table (variant + posterior, feedback +
/// posterior, prune) must be atomic. History tables are append-only and are
/// never cleaned up when a variant is deleted.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a variant together with its default posterior
    async fn insert_variant(&self, variant: &Variant) -> Result<()>;

    async fn get_variant(&self, id: &str) -> Result<Option<Variant>>;

    /// All variants, newest first
    async fn list_variants(&self) -> Result<Vec<Variant>>;

    async fn get_posterior(&self, variant_id: &str) -> Result<Option<Posterior>>;

    /// Insert or replace a posterior
    async fn put_posterior(&self, posterior: &Posterior) -> Result<()>;

    /// Append a feedback event and write the updated posterior in one transaction
    async fn record_feedback(&self, event: &FeedbackEvent, posterior: &Posterior) -> Result<()>;

    /// Append a comparison and write both updated posteriors in one transaction
    async fn record_preference(
        &self,
        comparison: &PreferenceComparison,
        winner: &Posterior,
        loser: &Posterior,
    ) -> Result<()>;

    async fn append_observation(&self, observation: &ContextualObservation) -> Result<()>;

    /// All contextual observations in insertion order
    async fn list_observations(&self) -> Result<Vec<ContextualObservation>>;

    /// Variants with at least `min_trials` trials, best average reward first
    async fn top_by_reward(&self, limit: usize, min_trials: u64) -> Result<Vec<(Variant, Posterior)>>;

    /// Ids of stored variants with enough trials and a win rate below the threshold
    ///
    /// Posterior rows without a variant row are never candidates.
    async fn prune_candidates(&self, min_trials: u64, max_win_rate: f64) -> Result<Vec<String>>;

    /// Delete a variant and its posterior. Returns false if neither existed.
    async fn delete_variant(&self, id: &str) -> Result<bool>;

    /// Feedback events for a variant, newest first
    async fn feedback_history(&self, variant_id: &str, limit: usize) -> Result<Vec<FeedbackEvent>>;

    /// Comparisons a variant took part in, newest first
    async fn preference_history(&self, variant_id: &str, limit: usize) -> Result<Vec<PreferenceComparison>>;

    /// Release the underlying resources. Later calls fail.
    async fn close(&self) -> Result<()>;
}
