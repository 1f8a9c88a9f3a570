//! Evolutionary Optimizer - breeds new variants from the best performers
//!
//! The breeding pool is the top-N variants by average reward among those with
//! enough trials. It is fixed for the whole call: offspring start without
//! trials and are not fed back into the pool, so every generation samples the
//! same initial population.

pub mod generator;
pub mod llm;

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bandit::Sampler;
use crate::config::EvolutionConfig;
use crate::error::{EngineError, Result};
use crate::storage::Storage;
use crate::types::{Posterior, Variant};

pub use generator::{Generator, SpliceGenerator};
pub use llm::LlmGenerator;

/// Best of `k` uniform draws (with replacement) by average reward
///
/// Ties keep the earlier draw.
pub fn tournament_select<R: Rng + ?Sized>(rng: &mut R, population: &[(Variant, Posterior)], k: usize) -> usize {
    let mut best = rng.random_range(0..population.len());
    for _ in 1..k {
        let challenger = rng.random_range(0..population.len());
        if population[challenger].1.avg_reward > population[best].1.avg_reward {
            best = challenger;
        }
    }
    best
}

/// Population-based search over variant content
pub struct EvolutionaryOptimizer {
    storage: Arc<dyn Storage>,
    sampler: Arc<Sampler>,
    generator: Arc<dyn Generator>,
    config: EvolutionConfig,
}

impl EvolutionaryOptimizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        sampler: Arc<Sampler>,
        generator: Arc<dyn Generator>,
        config: EvolutionConfig,
    ) -> Self {
        Self { storage, sampler, generator, config }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Breeding pool: top `population_size` eligible variants
    pub async fn population(&self, population_size: usize) -> Result<Vec<(Variant, Posterior)>> {
        self.storage
            .top_by_reward(population_size, self.config.min_trials_before_exploitation)
            .await
    }

    /// Run `generations` breeding steps and return the new variant ids
    ///
    /// A failed crossover or mutation skips that step only. Storage failures
    /// abort the run.
    pub async fn evolve(&self, population_size: usize, generations: usize) -> Result<Vec<String>> {
        if population_size == 0 {
            return Err(EngineError::InvalidArgument("population size must be positive".to_string()));
        }
        if self.config.tournament_size == 0 {
            return Err(EngineError::InvalidArgument("tournament size must be positive".to_string()));
        }

        let population = self.population(population_size).await?;
        if population.is_empty() {
            info!(
                "No variant has {} trials yet, skipping evolution",
                self.config.min_trials_before_exploitation
            );
            return Ok(Vec::new());
        }

        let k = self.config.tournament_size;
        let mut offspring = Vec::new();

        for generation in 0..generations {
            let (first, second, mutate) = self.sampler.with_rng(|rng| {
                let first = tournament_select(rng, &population, k);
                let second = tournament_select(rng, &population, k);
                let mutate = rng.random::<f64>() < self.config.mutation_rate;
                (first, second, mutate)
            });
            let parent = &population[first].0;
            let other = &population[second].0;

            let child = match self.generator.crossover(&parent.content, &other.content).await {
                Ok(child) => child,
                Err(e) => {
                    warn!("Crossover of {} x {} failed, skipping step {}: {}", parent.id, other.id, generation, e);
                    continue;
                }
            };

            let child = if mutate {
                match self.generator.mutate(&child).await {
                    Ok(mutated) => mutated,
                    Err(e) => {
                        warn!("Mutation failed, skipping step {}: {}", generation, e);
                        continue;
                    }
                }
            } else {
                child
            };

            let variant = Variant::new(child, Some(parent.id.clone()), parent.generation + 1);
            self.storage.insert_variant(&variant).await?;

            debug!(
                "Bred {} (gen {}) from {} x {}{}",
                variant.id,
                variant.generation,
                parent.id,
                other.id,
                if mutate { " with mutation" } else { "" }
            );
            offspring.push(variant.id);
        }

        info!(
            "Evolution produced {} of {} offspring from a pool of {} via {}",
            offspring.len(),
            generations,
            population.len(),
            self.generator.name()
        );
        Ok(offspring)
    }
}
