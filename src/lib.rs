//! Prompt Evolver - Self-Tuning Variant Selection Library
//!
//! A multi-armed-bandit engine over competing prompt templates:
//! - Beta posteriors per variant, updated from task feedback
//! - Thompson Sampling, heuristic contextual and LinUCB selection
//! - Monte-Carlo A/B significance testing
//! - Evolutionary search (tournament selection, crossover, mutation)
//! - Pairwise preference updates
//! - A maintenance controller for pruning and exploration decay
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use prompt_evolver::{Config, PromptEngine, SqliteStorage, SpliceGenerator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(SqliteStorage::open("variants.db").await?);
//!     let engine = PromptEngine::new(storage, Arc::new(SpliceGenerator), Config::default()).await?;
//!     let a = engine.create_variant("Summarize: {{input}}", None, 0).await?;
//!     let b = engine.create_variant("Summarize in three bullets: {{input}}", None, 0).await?;
//!     let chosen = engine.thompson_sample(&[a, b]).await?;
//!     println!("{}", chosen);
//!     Ok(())
//! }
//! ```

// Core modules (leaves first)
pub mod error;
pub mod types;
pub mod config;
pub mod storage;
pub mod bandit;
pub mod posterior;
pub mod strategy;
pub mod evolution;
pub mod preference;
pub mod engine;
pub mod maintenance;
pub mod cli;

pub use config::Config;
pub use engine::PromptEngine;
pub use error::{EngineError, GenerationError, Result};
pub use evolution::{EvolutionaryOptimizer, Generator, LlmGenerator, SpliceGenerator};
pub use maintenance::{ControllerState, CycleReport, MaintenanceController};
pub use storage::{SqliteStorage, Storage};
pub use strategy::{ContextExtractor, CostAwareReward, RewardFunction, SuccessReward, TextShapeExtractor};
pub use types::{AbTestResult, Posterior, PosteriorField, TaskOutcome, Variant};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
