//! CLI interface for prompt-evolver

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{Config, GeneratorConfig, GeneratorProvider};
use crate::engine::PromptEngine;
use crate::evolution::{Generator, LlmGenerator, SpliceGenerator};
use crate::maintenance::MaintenanceController;
use crate::storage::{SqliteStorage, Storage};
use crate::types::TaskOutcome;

#[derive(Parser)]
#[command(name = "prompt-evolver")]
#[command(about = "Self-tuning prompt variant selection with bandits and evolutionary search", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "PROMPT_EVOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overrides storage.database_path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new variant
    Create {
        /// Template content
        #[arg(required_unless_present = "file")]
        content: Option<String>,
        /// Read the content from a file
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Parent variant id
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, default_value = "0")]
        generation: u32,
    },
    /// List all variants, newest first
    List,
    /// Show a variant's posterior, lineage and recent history
    Stats {
        id: String,
        /// Number of history entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Record the outcome of a task run with a variant
    Feedback {
        id: String,
        /// The task succeeded
        #[arg(short, long)]
        success: bool,
        /// Explicit reward; computed from the outcome when omitted
        #[arg(short, long)]
        reward: Option<f64>,
        #[arg(long, default_value = "0")]
        latency_ms: f64,
        /// Token cost of the run
        #[arg(long, default_value = "0")]
        cost: f64,
        /// Task identifier (random when omitted)
        #[arg(long)]
        task: Option<String>,
    },
    /// Pick a variant with Thompson Sampling (all variants when none given)
    Select {
        candidates: Vec<String>,
    },
    /// Pick a variant for a context
    Contextual {
        #[arg(required = true)]
        candidates: Vec<String>,
        /// Comma-separated feature vector
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required_unless_present = "task")]
        features: Vec<f64>,
        /// Derive features from task text instead
        #[arg(long, conflicts_with = "features")]
        task: Option<String>,
        /// Use per-variant LinUCB instead of the heuristic
        #[arg(long, conflicts_with = "task")]
        linucb: bool,
    },
    /// Record a contextual reward for LinUCB
    Observe {
        id: String,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        features: Vec<f64>,
        #[arg(long)]
        reward: f64,
    },
    /// Monte-Carlo A/B test between two variants
    Compare {
        a: String,
        b: String,
    },
    /// Record that one variant was preferred over another
    Prefer {
        winner: String,
        loser: String,
        #[arg(long, default_value = "")]
        context: String,
        /// The judgement came from a human
        #[arg(long)]
        human: bool,
    },
    /// Breed new variants from the best performers
    Evolve {
        #[arg(short, long)]
        population: Option<usize>,
        #[arg(short, long)]
        generations: Option<usize>,
    },
    /// Run a single maintenance cycle
    Maintain,
    /// Run maintenance on a schedule until Ctrl+C
    Daemon,
    /// Show or initialize configuration
    Config {
        /// Show current configuration (the default)
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider {
        GeneratorProvider::Splice => Ok(Arc::new(SpliceGenerator)),
        GeneratorProvider::OpenRouter => {
            let generator = LlmGenerator::from_config(config)
                .context("Failed to set up the LLM generator")?;
            Ok(Arc::new(generator))
        }
    }
}

async fn open_engine(config: &Config) -> Result<PromptEngine> {
    let path = config.storage.database_path()?;
    let storage = SqliteStorage::open(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let generator = build_generator(&config.generator)?;
    Ok(PromptEngine::new(storage, generator, config.clone()).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    let mut preview: String = first_line.chars().take(60).collect();
    if preview.len() < first_line.len() || content.lines().count() > 1 {
        preview.push_str("...");
    }
    preview
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { init: true, .. } = cli.command {
        return init_config(&cli);
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(database) = cli.database.clone() {
        config.storage.database_path = Some(database);
    }

    if let Commands::Config { .. } = cli.command {
        return show_config(&cli, &config);
    }

    let engine = Arc::new(open_engine(&config).await?);
    let result = run_command(&cli, &config, engine.clone()).await;
    engine.close().await?;
    result
}

fn config_file(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => crate::config::config_path(),
    }
}

fn init_config(cli: &Cli) -> Result<()> {
    let path = config_file(cli)?;
    if path.exists() {
        anyhow::bail!("Config file already exists at {}", path.display());
    }
    Config::default().save_to(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn show_config(cli: &Cli, config: &Config) -> Result<()> {
    if cli.json {
        print_json(config)?;
    } else {
        println!("# {}", config_file(cli)?.display());
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

async fn run_command(cli: &Cli, config: &Config, engine: Arc<PromptEngine>) -> Result<()> {
    match &cli.command {
        Commands::Create { content, file, parent, generation } => {
            let content = match (content, file) {
                (Some(content), _) => content.clone(),
                (None, Some(file)) => std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                (None, None) => anyhow::bail!("Provide content or --file"),
            };
            let id = engine.create_variant(&content, parent.as_deref(), *generation).await?;
            if cli.json {
                print_json(&serde_json::json!({ "id": id }))?;
            } else {
                println!("{}", id);
            }
        }
        Commands::List => {
            let variants = engine.get_all_variants().await?;
            if cli.json {
                let mut rows = Vec::with_capacity(variants.len());
                for variant in variants {
                    let posterior = engine.get_variant_stats(&variant.id).await?;
                    rows.push(serde_json::json!({ "variant": variant, "posterior": posterior }));
                }
                print_json(&rows)?;
            } else if variants.is_empty() {
                println!("No variants yet. Create one with `prompt-evolver create`.");
            } else {
                println!("{:<36}  {:>3}  {:>6}  {:>7}  {:>6}  CONTENT", "ID", "GEN", "TRIALS", "WIN", "REWARD");
                for variant in variants {
                    let p = engine.get_variant_stats(&variant.id).await?;
                    println!(
                        "{:<36}  {:>3}  {:>6}  {:>7.3}  {:>6.3}  {}",
                        variant.id,
                        variant.generation,
                        p.total_trials,
                        p.win_rate(),
                        p.avg_reward,
                        preview(&variant.content)
                    );
                }
            }
        }
        Commands::Stats { id, limit } => {
            let posterior = engine.get_variant_stats(id).await?;
            let lineage = engine.lineage(id).await?;
            let feedback = engine.feedback_history(id, *limit).await?;
            let preferences = engine.preference_history(id, *limit).await?;

            if cli.json {
                print_json(&serde_json::json!({
                    "posterior": posterior,
                    "lineage": lineage,
                    "feedback": feedback,
                    "preferences": preferences,
                }))?;
            } else {
                if lineage.is_empty() {
                    println!("Variant {} is not registered (showing default prior)", id);
                }
                println!("Posterior:  Beta({:.2}, {:.2})  win rate {:.3}", posterior.alpha, posterior.beta, posterior.win_rate());
                println!("Trials:     {}", posterior.total_trials);
                println!("Avg reward: {:.3}", posterior.avg_reward);
                println!("Avg latency {:.1} ms, avg cost {:.1}", posterior.avg_latency_ms, posterior.avg_cost);
                if lineage.len() > 1 {
                    let chain: Vec<&str> = lineage.iter().map(|v| v.id.as_str()).collect();
                    println!("Lineage:    {}", chain.join(" <- "));
                }
                if !feedback.is_empty() {
                    println!("\nRecent feedback:");
                    for event in &feedback {
                        println!(
                            "  {}  {}  reward {:.3}  {}",
                            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            if event.success { "ok  " } else { "fail" },
                            event.reward,
                            event.task_id
                        );
                    }
                }
                if !preferences.is_empty() {
                    println!("\nRecent comparisons:");
                    for cmp in &preferences {
                        let verdict = if cmp.winner_id == *id { "won against" } else { "lost to" };
                        let other = if cmp.winner_id == *id { &cmp.loser_id } else { &cmp.winner_id };
                        println!("  {} {}{}", verdict, other, if cmp.human_feedback { " (human)" } else { "" });
                    }
                }
            }
        }
        Commands::Feedback { id, success, reward, latency_ms, cost, task } => {
            let task_id = task.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let posterior = match reward {
                Some(reward) => {
                    engine
                        .record_feedback(&task_id, id, *reward, *latency_ms, *cost, *success, chrono::Utc::now())
                        .await?
                }
                None => {
                    let outcome = TaskOutcome { success: *success, latency_ms: *latency_ms, token_cost: *cost };
                    engine.record_outcome(&task_id, id, outcome).await?
                }
            };
            if cli.json {
                print_json(&posterior)?;
            } else {
                println!(
                    "Recorded. Beta({:.2}, {:.2}) after {} trials",
                    posterior.alpha, posterior.beta, posterior.total_trials
                );
            }
        }
        Commands::Select { candidates } => {
            let candidates = if candidates.is_empty() {
                engine.get_all_variants().await?.into_iter().map(|v| v.id).collect()
            } else {
                candidates.clone()
            };
            let chosen = engine.thompson_sample(&candidates).await?;
            if cli.json {
                print_json(&serde_json::json!({ "id": chosen }))?;
            } else {
                println!("{}", chosen);
            }
        }
        Commands::Contextual { candidates, features, task, linucb } => {
            let chosen = match task {
                Some(task) => engine.select_for_task(candidates, task).await?,
                None if *linucb => engine.linucb_select(candidates, features).await?,
                None => engine.contextual_select(candidates, features).await?,
            };
            if cli.json {
                print_json(&serde_json::json!({ "id": chosen }))?;
            } else {
                println!("{}", chosen);
            }
        }
        Commands::Observe { id, features, reward } => {
            engine.record_contextual_reward(id, features, *reward).await?;
            if !cli.json {
                println!("Recorded contextual reward {} for {}", reward, id);
            }
        }
        Commands::Compare { a, b } => {
            let result = engine.evaluate_ab_test(a, b).await?;
            if cli.json {
                print_json(&result)?;
            } else {
                match &result.winner {
                    Some(winner) => println!("Winner: {}", winner),
                    None => println!("No significant difference"),
                }
                println!("Confidence: {:.4}", result.confidence);
                println!("p-value:    {:.4}", result.p_value);
            }
        }
        Commands::Prefer { winner, loser, context, human } => {
            engine.record_preference(winner, loser, context, *human).await?;
            if !cli.json {
                println!("Recorded preference for {} over {}", winner, loser);
            }
        }
        Commands::Evolve { population, generations } => {
            let population = population.unwrap_or(config.evolution.population_size);
            let generations = generations.unwrap_or(config.evolution.generations);
            let offspring = engine.evolve_prompts(population, generations).await?;
            if cli.json {
                print_json(&offspring)?;
            } else if offspring.is_empty() {
                println!(
                    "No offspring produced (variants need {} trials to breed)",
                    config.evolution.min_trials_before_exploitation
                );
            } else {
                for id in offspring {
                    println!("{}", id);
                }
            }
        }
        Commands::Maintain => {
            let controller = MaintenanceController::new(engine.clone(), config.maintenance.clone());
            let report = controller.run_cycle().await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("Maintenance cycle: {}", report);
            }
        }
        Commands::Daemon => {
            let mut controller = MaintenanceController::new(engine.clone(), config.maintenance.clone());
            let mut reports = controller.subscribe();
            controller.start().await?;
            println!(
                "Running maintenance every {}s. Press Ctrl+C to stop.",
                config.maintenance.interval_secs
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    report = reports.recv() => match report {
                        Ok(report) if cli.json => println!("{}", serde_json::to_string(&report)?),
                        Ok(report) => println!("Maintenance cycle: {}", report),
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            println!("Stopping...");
            controller.stop().await?;
        }
        Commands::Config { .. } => show_config(cli, config)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_feedback() {
        let cli = Cli::try_parse_from(["prompt-evolver", "feedback", "v1", "--success", "--latency-ms", "120"]).unwrap();
        match cli.command {
            Commands::Feedback { id, success, reward, latency_ms, .. } => {
                assert_eq!(id, "v1");
                assert!(success);
                assert!(reward.is_none());
                assert_eq!(latency_ms, 120.0);
            }
            _ => panic!("expected feedback"),
        }
    }

    #[test]
    fn test_parse_features() {
        let cli = Cli::try_parse_from(["prompt-evolver", "contextual", "a", "b", "--features", "0.5,-1,2", "--linucb"]).unwrap();
        match cli.command {
            Commands::Contextual { candidates, features, linucb, .. } => {
                assert_eq!(candidates, vec!["a", "b"]);
                assert_eq!(features, vec![0.5, -1.0, 2.0]);
                assert!(linucb);
            }
            _ => panic!("expected contextual"),
        }
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("line one\nline two"), "line one...");
    }
}
