//! Maintenance Controller - periodic prune, evolve and exploration decay
//!
//! Runs on the tokio clock. The first cycle fires one full interval after
//! [`MaintenanceController::start`]. [`MaintenanceController::stop`]
//! broadcasts shutdown and waits for the task, letting a cycle that is
//! already running finish. A failed cycle is logged and the schedule goes on.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::MaintenanceConfig;
use crate::engine::PromptEngine;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Stopped => write!(f, "Stopped"),
            ControllerState::Running => write!(f, "Running"),
            ControllerState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub pruned: Vec<String>,
    pub evolved: Vec<String>,
    pub exploration_rate: f64,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pruned {}, evolved {}, exploration rate {:.4}",
            self.pruned.len(),
            self.evolved.len(),
            self.exploration_rate
        )
    }
}

/// One cycle: prune, then evolve, then decay
async fn cycle(engine: &PromptEngine, config: &MaintenanceConfig) -> crate::error::Result<CycleReport> {
    let pruned = engine.prune(config.prune_min_trials, config.prune_max_win_rate).await?;
    let evolved = engine.evolve_prompts(config.population_size, config.generations).await?;
    let exploration_rate = engine.decay_exploration(config.exploration_decay, config.exploration_floor);
    Ok(CycleReport { pruned, evolved, exploration_rate })
}

/// Owner of the recurring maintenance task
pub struct MaintenanceController {
    engine: Arc<PromptEngine>,
    config: MaintenanceConfig,
    state: Arc<Mutex<ControllerState>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    reports: broadcast::Sender<CycleReport>,
}

impl MaintenanceController {
    pub fn new(engine: Arc<PromptEngine>, config: MaintenanceConfig) -> Self {
        let (reports, _) = broadcast::channel(16);
        Self {
            engine,
            config,
            state: Arc::new(Mutex::new(ControllerState::Stopped)),
            shutdown_tx: None,
            handle: None,
            reports,
        }
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    /// Receive a report after every scheduled or manual cycle
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    /// Run one cycle now, outside the schedule
    pub async fn run_cycle(&self) -> crate::error::Result<CycleReport> {
        let report = cycle(&self.engine, &self.config).await?;
        info!("Maintenance cycle: {}", report);
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    /// Spawn the recurring task
    pub async fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Stopped {
            anyhow::bail!("Maintenance controller is not stopped (current state: {})", *state);
        }

        let period = Duration::from_secs(self.config.interval_secs);
        if period.is_zero() {
            anyhow::bail!("Maintenance interval must be positive");
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = self.engine.clone();
        let config = self.config.clone();
        let reports = self.reports.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match cycle(&engine, &config).await {
                            Ok(report) => {
                                info!("Maintenance cycle: {}", report);
                                let _ = reports.send(report);
                            }
                            Err(e) => warn!("Maintenance cycle failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Maintenance task shutting down");
                        break;
                    }
                }
            }
        }));

        *state = ControllerState::Running;
        info!("Maintenance controller started (every {}s)", self.config.interval_secs);
        Ok(())
    }

    /// Signal shutdown and wait for the task. No-op unless running.
    pub async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Running {
            return Ok(());
        }
        *state = ControllerState::Stopping;
        drop(state);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let joined = match self.handle.take() {
            Some(handle) => handle.await.context("Maintenance task did not shut down cleanly"),
            None => Ok(()),
        };

        *self.state.lock().await = ControllerState::Stopped;
        info!("Maintenance controller stopped");
        joined
    }
}

impl Drop for MaintenanceController {
    fn drop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}
