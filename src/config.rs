//! Configuration management
//!
//! Engine tuning knobs, evolution and maintenance schedules, generator
//! settings and the database location. Stored as TOML in the project config
//! directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Selection and statistics settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Evolutionary search defaults
    #[serde(default)]
    pub evolution: EvolutionConfig,
    /// Background maintenance schedule
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Crossover/mutation provider
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Database location
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for the shared random source. Unset means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Starting exploration rate for contextual selection
    #[serde(default = "default_exploration_rate")]
    pub initial_exploration_rate: f64,
    /// Paired draws per A/B test
    #[serde(default = "default_ab_test_trials")]
    pub ab_test_trials: u32,
    /// Confidence above which an A/B test declares a winner
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    /// Pseudo-count added per pairwise preference
    #[serde(default = "default_preference_strength")]
    pub preference_strength: f64,
}

fn default_exploration_rate() -> f64 {
    1.0
}

fn default_ab_test_trials() -> u32 {
    10_000
}

fn default_significance_level() -> f64 {
    0.95
}

fn default_preference_strength() -> f64 {
    0.1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            initial_exploration_rate: default_exploration_rate(),
            ab_test_trials: default_ab_test_trials(),
            significance_level: default_significance_level(),
            preference_strength: default_preference_strength(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Breeding pool size for on-demand evolution
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Offspring attempts for on-demand evolution
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Variants with fewer trials never enter the breeding pool
    #[serde(default = "default_min_trials")]
    pub min_trials_before_exploitation: u64,
    /// Probability of mutating an offspring after crossover
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
}

fn default_population_size() -> usize {
    5
}

fn default_generations() -> usize {
    3
}

fn default_min_trials() -> u64 {
    10
}

fn default_mutation_rate() -> f64 {
    0.2
}

fn default_tournament_size() -> usize {
    3
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations: default_generations(),
            min_trials_before_exploitation: default_min_trials(),
            mutation_rate: default_mutation_rate(),
            tournament_size: default_tournament_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Variants need at least this many trials before they can be pruned
    #[serde(default = "default_prune_min_trials")]
    pub prune_min_trials: u64,
    /// Variants whose posterior mean is below this are pruned
    #[serde(default = "default_prune_max_win_rate")]
    pub prune_max_win_rate: f64,
    #[serde(default = "default_maintenance_population")]
    pub population_size: usize,
    #[serde(default = "default_maintenance_generations")]
    pub generations: usize,
    /// Multiplier applied to the exploration rate each cycle
    #[serde(default = "default_exploration_decay")]
    pub exploration_decay: f64,
    /// Exploration rate never decays below this
    #[serde(default = "default_exploration_floor")]
    pub exploration_floor: f64,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_prune_min_trials() -> u64 {
    20
}

fn default_prune_max_win_rate() -> f64 {
    0.05
}

fn default_maintenance_population() -> usize {
    5
}

fn default_maintenance_generations() -> usize {
    2
}

fn default_exploration_decay() -> f64 {
    0.95
}

fn default_exploration_floor() -> f64 {
    0.05
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            prune_min_trials: default_prune_min_trials(),
            prune_max_win_rate: default_prune_max_win_rate(),
            population_size: default_maintenance_population(),
            generations: default_maintenance_generations(),
            exploration_decay: default_exploration_decay(),
            exploration_floor: default_exploration_floor(),
        }
    }
}

/// Which generator backs crossover and mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorProvider {
    /// Offline line/sentence splicing
    Splice,
    /// OpenAI-compatible chat completions endpoint
    OpenRouter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: GeneratorProvider,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider() -> GeneratorProvider {
    GeneratorProvider::Splice
}

fn default_generator_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generator_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Defaults to `variants.db` in the data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("variants.db")),
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be within [0, 1], got {}", name, value);
    }
    Ok(())
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if !(engine.initial_exploration_rate >= 0.0 && engine.initial_exploration_rate.is_finite()) {
            bail!("engine.initial_exploration_rate must be a non-negative number");
        }
        if engine.ab_test_trials == 0 {
            bail!("engine.ab_test_trials must be positive");
        }
        check_unit("engine.significance_level", engine.significance_level)?;
        if !(engine.preference_strength > 0.0 && engine.preference_strength.is_finite()) {
            bail!("engine.preference_strength must be positive");
        }

        let evolution = &self.evolution;
        check_unit("evolution.mutation_rate", evolution.mutation_rate)?;
        if evolution.tournament_size == 0 {
            bail!("evolution.tournament_size must be positive");
        }

        let maintenance = &self.maintenance;
        if maintenance.interval_secs == 0 {
            bail!("maintenance.interval_secs must be positive");
        }
        check_unit("maintenance.prune_max_win_rate", maintenance.prune_max_win_rate)?;
        check_unit("maintenance.exploration_decay", maintenance.exploration_decay)?;
        if !(maintenance.exploration_floor >= 0.0 && maintenance.exploration_floor.is_finite()) {
            bail!("maintenance.exploration_floor must be a non-negative number");
        }

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "prompt-evolver", "prompt-evolver")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "prompt-evolver", "prompt-evolver")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.ab_test_trials, 10_000);
        assert_eq!(config.engine.significance_level, 0.95);
        assert_eq!(config.engine.preference_strength, 0.1);
        assert_eq!(config.evolution.min_trials_before_exploitation, 10);
        assert_eq!(config.evolution.mutation_rate, 0.2);
        assert_eq!(config.evolution.tournament_size, 3);
        assert_eq!(config.maintenance.interval_secs, 3600);
        assert_eq!(config.maintenance.prune_min_trials, 20);
        assert_eq!(config.maintenance.population_size, 5);
        assert_eq!(config.maintenance.generations, 2);
        assert_eq!(config.generator.provider, GeneratorProvider::Splice);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            seed = 7

            [maintenance]
            interval_secs = 60

            [generator]
            provider = "openrouter"
            "#,
        ).unwrap();
        assert_eq!(config.engine.seed, Some(7));
        assert_eq!(config.engine.ab_test_trials, 10_000);
        assert_eq!(config.maintenance.interval_secs, 60);
        assert_eq!(config.maintenance.exploration_floor, 0.05);
        assert_eq!(config.generator.provider, GeneratorProvider::OpenRouter);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.evolution.mutation_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.maintenance.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.ab_test_trials = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");
        let mut config = Config::default();
        config.engine.seed = Some(99);
        config.storage.database_path = Some(dir.path().join("v.db"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.seed, Some(99));
        assert_eq!(loaded.storage.database_path().unwrap(), dir.path().join("v.db"));
    }

    #[test]
    fn test_default_config_toml_parses() {
        let parsed: Config = toml::from_str(&default_config_toml()).unwrap();
        assert_eq!(parsed.evolution.generations, 3);
    }
}
