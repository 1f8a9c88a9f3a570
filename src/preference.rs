//! Preference Updater - pairwise judgements as posterior boosts
//!
//! A Bradley-Terry style nudge: the winner gains `strength` success
//! pseudo-counts and the loser gains `strength` failure pseudo-counts.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::posterior::PosteriorStore;
use crate::types::PreferenceComparison;

pub struct PreferenceUpdater {
    posteriors: Arc<PosteriorStore>,
    strength: f64,
}

impl PreferenceUpdater {
    pub fn new(posteriors: Arc<PosteriorStore>, strength: f64) -> Self {
        Self { posteriors, strength }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    /// Log the comparison and boost winner alpha and loser beta, all or nothing
    ///
    /// Ids without a posterior start from the default prior, which the boost
    /// then persists.
    pub async fn record_preference(
        &self,
        winner_id: &str,
        loser_id: &str,
        context: &str,
        human_feedback: bool,
    ) -> Result<()> {
        let comparison = PreferenceComparison {
            winner_id: winner_id.to_string(),
            loser_id: loser_id.to_string(),
            context: context.to_string(),
            human_feedback,
            timestamp: Utc::now(),
        };
        self.posteriors.apply_preference(&comparison, self.strength).await?;

        info!(
            "Preference recorded: {} over {}{}",
            winner_id,
            loser_id,
            if human_feedback { " (human)" } else { "" }
        );
        Ok(())
    }
}
