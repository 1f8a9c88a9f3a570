//! Posterior Store - per-variant Bayesian statistics
//!
//! Reads never persist anything: an unknown id resolves to a transient
//! Beta(1, 1) prior. Writes are read-modify-write cycles serialized per
//! variant id through a keyed lock, so concurrent feedback and preference
//! boosts on the same variant cannot lose updates while different variants
//! proceed independently.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::storage::Storage;
use crate::types::{FeedbackEvent, Posterior, PosteriorField, PreferenceComparison};

/// Lock table keyed by variant id
#[derive(Default)]
pub(crate) struct VariantLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VariantLocks {
    pub(crate) async fn acquire(&self, variant_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(variant_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry for a deleted variant once nobody else holds or
    /// waits on it
    ///
    /// A waiter holds a clone of the entry, so while one exists the entry
    /// stays and later callers queue behind it on the same mutex.
    pub(crate) fn release(&self, variant_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(variant_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(variant_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

fn boosted(mut posterior: Posterior, field: PosteriorField, amount: f64) -> Result<Posterior> {
    posterior.boost(field, amount);
    if !(posterior.alpha > 0.0 && posterior.beta > 0.0) {
        return Err(EngineError::StatisticalUndefined(format!(
            "boosting {} of {} by {} leaves a non-positive parameter",
            field, posterior.variant_id, amount
        )));
    }
    Ok(posterior)
}

/// Owner of every posterior read-modify-write
pub struct PosteriorStore {
    storage: Arc<dyn Storage>,
    locks: VariantLocks,
}

impl PosteriorStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, locks: VariantLocks::default() }
    }

    /// Stored posterior, or a default prior that is not persisted
    pub async fn get(&self, variant_id: &str) -> Result<Posterior> {
        Ok(self
            .storage
            .get_posterior(variant_id)
            .await?
            .unwrap_or_else(|| Posterior::prior(variant_id)))
    }

    /// Fold one outcome into the posterior and append it to the feedback log
    ///
    /// An id with no stored posterior starts from the default prior.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_feedback(
        &self,
        task_id: &str,
        variant_id: &str,
        success: bool,
        reward: f64,
        latency_ms: f64,
        cost: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Posterior> {
        for (name, value) in [("reward", reward), ("latency", latency_ms), ("cost", cost)] {
            if !value.is_finite() {
                return Err(EngineError::InvalidArgument(format!("{} must be finite, got {}", name, value)));
            }
        }

        let _guard = self.locks.acquire(variant_id).await;

        let mut posterior = self.get(variant_id).await?;
        posterior.observe(success, reward, latency_ms, cost);

        let event = FeedbackEvent {
            task_id: task_id.to_string(),
            variant_id: variant_id.to_string(),
            reward,
            latency_ms,
            token_cost: cost,
            success,
            timestamp,
        };
        self.storage.record_feedback(&event, &posterior).await?;

        debug!(
            "Feedback for {}: success={} alpha={:.2} beta={:.2} trials={}",
            variant_id, success, posterior.alpha, posterior.beta, posterior.total_trials
        );
        Ok(posterior)
    }

    /// Add pseudo-counts to alpha or beta
    ///
    /// Trial count and averages stay as they are, so after preference
    /// updates `total_trials` no longer matches `alpha + beta - 2`.
    /// Feedback and preference updates share one posterior.
    pub async fn boost(&self, variant_id: &str, field: PosteriorField, amount: f64) -> Result<Posterior> {
        if !amount.is_finite() {
            return Err(EngineError::InvalidArgument(format!("boost must be finite, got {}", amount)));
        }

        let _guard = self.locks.acquire(variant_id).await;

        let posterior = boosted(self.get(variant_id).await?, field, amount)?;
        self.storage.put_posterior(&posterior).await?;

        debug!("Boosted {} of {} by {}", field, variant_id, amount);
        Ok(posterior)
    }

    /// Log a comparison and move winner alpha and loser beta by `strength`
    ///
    /// Both variant locks are taken in id order. Both boosts are computed
    /// before anything is written, then the comparison and the two
    /// posteriors land in a single storage transaction.
    pub async fn apply_preference(
        &self,
        comparison: &PreferenceComparison,
        strength: f64,
    ) -> Result<(Posterior, Posterior)> {
        let (winner_id, loser_id) = (comparison.winner_id.as_str(), comparison.loser_id.as_str());
        if winner_id == loser_id {
            return Err(EngineError::InvalidArgument(format!(
                "winner and loser are the same variant: {}",
                winner_id
            )));
        }
        if !strength.is_finite() {
            return Err(EngineError::InvalidArgument(format!("boost must be finite, got {}", strength)));
        }

        let (first, second) = if winner_id < loser_id { (winner_id, loser_id) } else { (loser_id, winner_id) };
        let _first = self.locks.acquire(first).await;
        let _second = self.locks.acquire(second).await;

        let winner = boosted(self.get(winner_id).await?, PosteriorField::Alpha, strength)?;
        let loser = boosted(self.get(loser_id).await?, PosteriorField::Beta, strength)?;
        self.storage.record_preference(comparison, &winner, &loser).await?;

        Ok((winner, loser))
    }

    /// Delete a variant and its posterior if it still matches `should_delete`
    ///
    /// The check runs under the variant's lock, so an in-flight feedback
    /// update finishes before the delete and is taken into account.
    pub async fn delete_if(
        &self,
        variant_id: &str,
        should_delete: impl FnOnce(&Posterior) -> bool,
    ) -> Result<bool> {
        let guard = self.locks.acquire(variant_id).await;

        let posterior = self.get(variant_id).await?;
        if !should_delete(&posterior) {
            return Ok(false);
        }
        let deleted = self.storage.delete_variant(variant_id).await?;

        drop(guard);
        self.locks.release(variant_id);
        Ok(deleted)
    }
}
