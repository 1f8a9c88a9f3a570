//! prompt-evolver - self-tuning prompt variant selection
//!
//! Bandit selection, Bayesian feedback and evolutionary search over prompt
//! templates, stored in a local SQLite database.

use prompt_evolver::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for more)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    cli::run().await
}
