//! Prompt Engine - the public face of the variant-selection core
//!
//! Wires the posterior store, sampler, selectors, evaluator, optimizer and
//! preference updater over one shared [`Storage`]. All operations take
//! `&self`, so an engine behind an `Arc` can serve concurrent callers and the
//! maintenance controller at once.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bandit::{ab_test, heuristic_select, thompson_select, validate_candidates, LinUcb, Sampler};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::evolution::{EvolutionaryOptimizer, Generator};
use crate::posterior::PosteriorStore;
use crate::preference::PreferenceUpdater;
use crate::storage::Storage;
use crate::strategy::{ContextExtractor, RewardFunction, SuccessReward, TextShapeExtractor};
use crate::types::{
    AbTestResult, ContextualObservation, FeedbackEvent, Posterior, PreferenceComparison, TaskOutcome, Variant,
};

pub struct PromptEngine {
    storage: Arc<dyn Storage>,
    posteriors: Arc<PosteriorStore>,
    sampler: Arc<Sampler>,
    optimizer: EvolutionaryOptimizer,
    preferences: PreferenceUpdater,
    linucb: RwLock<LinUcb>,
    exploration_rate: Mutex<f64>,
    reward_fn: Box<dyn RewardFunction>,
    extractor: Box<dyn ContextExtractor>,
    config: Config,
}

impl PromptEngine {
    /// Build an engine over `storage`, rebuilding LinUCB state from the
    /// persisted contextual observations
    ///
    /// An invalid `config` is rejected as InvalidArgument.
    pub async fn new(storage: Arc<dyn Storage>, generator: Arc<dyn Generator>, config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidArgument(format!("invalid configuration: {}", e)))?;

        let sampler = Arc::new(Sampler::new(config.engine.seed));
        let posteriors = Arc::new(PosteriorStore::new(storage.clone()));
        let optimizer = EvolutionaryOptimizer::new(
            storage.clone(),
            sampler.clone(),
            generator,
            config.evolution.clone(),
        );
        let preferences = PreferenceUpdater::new(posteriors.clone(), config.engine.preference_strength);

        let mut linucb = LinUcb::new();
        let observations = storage.list_observations().await?;
        for obs in &observations {
            linucb.update(&obs.variant_id, &obs.features, obs.reward)?;
        }
        if !observations.is_empty() {
            debug!("Replayed {} contextual observations", observations.len());
        }

        Ok(Self {
            storage,
            posteriors,
            sampler,
            optimizer,
            preferences,
            linucb: RwLock::new(linucb),
            exploration_rate: Mutex::new(config.engine.initial_exploration_rate),
            reward_fn: Box::new(SuccessReward),
            extractor: Box::new(TextShapeExtractor),
            config,
        })
    }

    /// Replace the reward function used by [`record_outcome`](Self::record_outcome)
    pub fn with_reward_function(mut self, reward_fn: impl RewardFunction + 'static) -> Self {
        self.reward_fn = Box::new(reward_fn);
        self
    }

    /// Replace the extractor used by [`select_for_task`](Self::select_for_task)
    pub fn with_context_extractor(mut self, extractor: impl ContextExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- variants ---

    /// Register a variant with a default prior and return its id
    pub async fn create_variant(&self, content: &str, parent_id: Option<&str>, generation: u32) -> Result<String> {
        let variant = Variant::new(content, parent_id.map(str::to_string), generation);
        self.storage.insert_variant(&variant).await?;
        info!("Created variant {} (gen {})", variant.id, generation);
        Ok(variant.id)
    }

    pub async fn get_variant(&self, variant_id: &str) -> Result<Option<Variant>> {
        self.storage.get_variant(variant_id).await
    }

    /// All variants, newest first
    pub async fn get_all_variants(&self) -> Result<Vec<Variant>> {
        self.storage.list_variants().await
    }

    /// Current posterior; the default prior for unknown ids
    pub async fn get_variant_stats(&self, variant_id: &str) -> Result<Posterior> {
        self.posteriors.get(variant_id).await
    }

    /// The variant followed by its ancestors, stopping at a root or a pruned parent
    pub async fn lineage(&self, variant_id: &str) -> Result<Vec<Variant>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(variant_id.to_string());

        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                break;
            }
            match self.storage.get_variant(&id).await? {
                Some(variant) => {
                    next = variant.parent_id.clone();
                    chain.push(variant);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    pub async fn feedback_history(&self, variant_id: &str, limit: usize) -> Result<Vec<FeedbackEvent>> {
        self.storage.feedback_history(variant_id, limit).await
    }

    pub async fn preference_history(&self, variant_id: &str, limit: usize) -> Result<Vec<PreferenceComparison>> {
        self.storage.preference_history(variant_id, limit).await
    }

    // --- feedback ---

    #[allow(clippy::too_many_arguments)]
    pub async fn record_feedback(
        &self,
        task_id: &str,
        variant_id: &str,
        reward: f64,
        latency_ms: f64,
        token_cost: f64,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<Posterior> {
        self.posteriors
            .apply_feedback(task_id, variant_id, success, reward, latency_ms, token_cost, timestamp)
            .await
    }

    /// Score a raw outcome with the configured reward function and record it
    pub async fn record_outcome(&self, task_id: &str, variant_id: &str, outcome: TaskOutcome) -> Result<Posterior> {
        let reward = self.reward_fn.reward(&outcome);
        self.record_feedback(
            task_id,
            variant_id,
            reward,
            outcome.latency_ms,
            outcome.token_cost,
            outcome.success,
            Utc::now(),
        )
        .await
    }

    pub async fn record_preference(
        &self,
        winner_id: &str,
        loser_id: &str,
        context: &str,
        human_feedback: bool,
    ) -> Result<()> {
        self.preferences
            .record_preference(winner_id, loser_id, context, human_feedback)
            .await
    }

    // --- selection ---

    /// Thompson Sampling over the candidates' posteriors
    pub async fn thompson_sample(&self, candidates: &[String]) -> Result<String> {
        validate_candidates(candidates)?;

        let mut posteriors = Vec::with_capacity(candidates.len());
        for id in candidates {
            posteriors.push(self.posteriors.get(id).await?);
        }

        let index = self.sampler.with_rng(|rng| thompson_select(rng, &posteriors))?;
        debug!("Thompson picked {} of {} candidates", candidates[index], candidates.len());
        Ok(candidates[index].clone())
    }

    /// Heuristic contextual pick
    ///
    /// Every candidate scores `mean(features) + rate * sqrt(len)`, so the
    /// first candidate always wins. Use [`linucb_select`](Self::linucb_select)
    /// for history-aware choices.
    pub async fn contextual_select(&self, candidates: &[String], features: &[f64]) -> Result<String> {
        validate_candidates(candidates)?;
        let index = heuristic_select(candidates.len(), features, self.exploration_rate())?;
        Ok(candidates[index].clone())
    }

    /// Extract features from the task text and delegate to [`contextual_select`](Self::contextual_select)
    pub async fn select_for_task(&self, candidates: &[String], task: &str) -> Result<String> {
        let features = self.extractor.extract(task);
        self.contextual_select(candidates, &features).await
    }

    /// LinUCB pick with the current exploration rate as the confidence width
    pub async fn linucb_select(&self, candidates: &[String], features: &[f64]) -> Result<String> {
        validate_candidates(candidates)?;
        let rate = self.exploration_rate();
        let index = self.linucb.read().await.select(candidates, features, rate)?;
        Ok(candidates[index].clone())
    }

    /// Persist a contextual observation and fold it into the variant's LinUCB arm
    pub async fn record_contextual_reward(&self, variant_id: &str, features: &[f64], reward: f64) -> Result<()> {
        if !reward.is_finite() {
            return Err(EngineError::InvalidArgument(format!("reward must be finite, got {}", reward)));
        }

        let mut linucb = self.linucb.write().await;
        linucb.check_features(features)?;

        let observation = ContextualObservation {
            variant_id: variant_id.to_string(),
            features: features.to_vec(),
            reward,
            timestamp: Utc::now(),
        };
        self.storage.append_observation(&observation).await?;
        linucb.update(variant_id, features, reward)?;

        debug!("Contextual reward {} for {} ({} observations)", reward, variant_id, linucb.observations(variant_id));
        Ok(())
    }

    // --- evaluation ---

    /// Monte-Carlo A/B test between two variants
    ///
    /// The sampling loop runs on the blocking pool with a generator forked
    /// from the engine's, so it never stalls selection or feedback.
    pub async fn evaluate_ab_test(&self, variant_a: &str, variant_b: &str) -> Result<AbTestResult> {
        let a = self.posteriors.get(variant_a).await?;
        let b = self.posteriors.get(variant_b).await?;
        let trials = self.config.engine.ab_test_trials;
        let significance = self.config.engine.significance_level;
        let mut rng = self.sampler.fork();

        let result = tokio::task::spawn_blocking(move || ab_test(&mut rng, &a, &b, trials, significance)).await??;

        info!(
            "A/B {} vs {}: winner={} confidence={:.4} p={:.4}",
            variant_a,
            variant_b,
            result.winner.as_deref().unwrap_or("none"),
            result.confidence,
            result.p_value
        );
        Ok(result)
    }

    // --- evolution & maintenance ---

    pub async fn evolve_prompts(&self, population_size: usize, generations: usize) -> Result<Vec<String>> {
        self.optimizer.evolve(population_size, generations).await
    }

    /// Delete every variant with at least `min_trials` trials and a win rate
    /// below `max_win_rate`; returns the deleted ids
    ///
    /// Each candidate is re-checked under its variant lock before deletion.
    /// Feedback and preference history is kept.
    pub async fn prune(&self, min_trials: u64, max_win_rate: f64) -> Result<Vec<String>> {
        let candidates = self.storage.prune_candidates(min_trials, max_win_rate).await?;

        let mut pruned = Vec::new();
        for id in candidates {
            let deleted = self
                .posteriors
                .delete_if(&id, |p| p.total_trials >= min_trials && p.win_rate() < max_win_rate)
                .await?;
            if deleted {
                self.linucb.write().await.forget(&id);
                info!("Pruned variant {}", id);
                pruned.push(id);
            }
        }
        Ok(pruned)
    }

    pub fn exploration_rate(&self) -> f64 {
        *self.exploration_rate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `rate <- max(floor, rate * decay)`; returns the new rate
    pub fn decay_exploration(&self, decay: f64, floor: f64) -> f64 {
        let mut rate = self.exploration_rate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *rate = floor.max(*rate * decay);
        *rate
    }

    /// Release storage. Stop any maintenance controller first.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await?;
        info!("Engine closed");
        Ok(())
    }
}
