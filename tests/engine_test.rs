//! Integration tests for the public engine API

use async_trait::async_trait;
use chrono::Utc;
use prompt_evolver::types::{ContextualObservation, FeedbackEvent, PreferenceComparison};
use prompt_evolver::{Config, EngineError, Posterior, PromptEngine, SpliceGenerator, SqliteStorage, Storage, Variant};
use std::sync::Arc;

async fn engine_with(storage: Arc<dyn Storage>, seed: u64) -> anyhow::Result<PromptEngine> {
    let mut config = Config::default();
    config.engine.seed = Some(seed);
    Ok(PromptEngine::new(storage, Arc::new(SpliceGenerator), config).await?)
}

async fn in_memory(seed: u64) -> anyhow::Result<(Arc<dyn Storage>, PromptEngine)> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory()?);
    let engine = engine_with(storage.clone(), seed).await?;
    Ok((storage, engine))
}

#[tokio::test]
async fn test_create_then_stats_is_default_prior() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    let id = engine.create_variant("Summarize: {{input}}", None, 0).await?;

    let stats = engine.get_variant_stats(&id).await?;
    assert_eq!(stats, Posterior::prior(id.clone()));

    let variant = engine.get_variant(&id).await?.expect("variant exists");
    assert_eq!(variant.generation, 0);
    assert!(variant.parent_id.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_id_never_touches_storage() -> anyhow::Result<()> {
    let (storage, engine) = in_memory(1).await?;
    for _ in 0..3 {
        let stats = engine.get_variant_stats("nobody").await?;
        assert_eq!(stats.alpha, 1.0);
        assert_eq!(stats.beta, 1.0);
        assert_eq!(stats.total_trials, 0);
    }
    assert!(storage.get_posterior("nobody").await?.is_none());
    assert!(engine.get_all_variants().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_single_success_feedback() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    let id = engine.create_variant("t", None, 0).await?;

    engine.record_feedback("task-1", &id, 1.0, 320.0, 45.0, true, Utc::now()).await?;

    let stats = engine.get_variant_stats(&id).await?;
    assert!(stats.alpha > 1.0);
    assert_eq!(stats.beta, 1.0);
    assert_eq!(stats.total_trials, 1);
    assert!(stats.avg_reward > 0.5);

    let history = engine.feedback_history(&id, 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_id, "task-1");
    Ok(())
}

#[tokio::test]
async fn test_thompson_prefers_strong_posterior() -> anyhow::Result<()> {
    let (storage, engine) = in_memory(42).await?;
    let a = engine.create_variant("a", None, 0).await?;
    let b = engine.create_variant("b", None, 0).await?;
    storage.put_posterior(&Posterior { alpha: 21.0, beta: 1.0, total_trials: 20, ..Posterior::prior(a.clone()) }).await?;
    storage.put_posterior(&Posterior { alpha: 1.0, beta: 6.0, total_trials: 5, ..Posterior::prior(b.clone()) }).await?;

    let candidates = vec![b.clone(), a.clone()];
    let mut picked_a = 0;
    for _ in 0..50 {
        if engine.thompson_sample(&candidates).await? == a {
            picked_a += 1;
        }
    }
    assert!(picked_a > 35, "A picked only {} of 50 times", picked_a);
    Ok(())
}

#[tokio::test]
async fn test_thompson_rejects_bad_candidates() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    assert!(matches!(engine.thompson_sample(&[]).await, Err(EngineError::InvalidArgument(_))));

    let dup = vec!["x".to_string(), "x".to_string()];
    assert!(matches!(engine.thompson_sample(&dup).await, Err(EngineError::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn test_ab_test_finds_clear_winner() -> anyhow::Result<()> {
    let (_, engine) = in_memory(9).await?;
    let a = engine.create_variant("a", None, 0).await?;
    let b = engine.create_variant("b", None, 0).await?;

    for i in 0..30 {
        engine.record_feedback(&format!("a-{}", i), &a, 1.0, 100.0, 10.0, true, Utc::now()).await?;
        engine.record_feedback(&format!("b-{}", i), &b, 0.0, 100.0, 10.0, false, Utc::now()).await?;
    }

    let result = engine.evaluate_ab_test(&a, &b).await?;
    assert_eq!(result.winner.as_deref(), Some(a.as_str()));
    assert!(result.confidence > 0.9);
    assert!(result.p_value >= 0.0 && result.p_value <= 1.0);
    Ok(())
}

#[tokio::test]
async fn test_evolution_lineage() -> anyhow::Result<()> {
    let (_, engine) = in_memory(3).await?;
    let mut pool = Vec::new();
    for (n, content) in ["Answer briefly. Cite sources.", "Think step by step. Then answer.", "List facts. Summarize."]
        .iter()
        .enumerate()
    {
        let id = engine.create_variant(content, None, 0).await?;
        for i in 0..12 {
            let success = i % (n + 2) != 0;
            let reward = if success { 1.0 } else { 0.0 };
            engine.record_feedback(&format!("{}-{}", n, i), &id, reward, 50.0, 5.0, success, Utc::now()).await?;
        }
        pool.push(id);
    }
    // too few trials to breed
    let novice = engine.create_variant("New and untested.", None, 0).await?;

    let offspring = engine.evolve_prompts(5, 3).await?;
    assert_eq!(offspring.len(), 3);

    for id in &offspring {
        let child = engine.get_variant(id).await?.expect("offspring stored");
        let parent_id = child.parent_id.clone().expect("offspring has a parent");
        assert!(pool.contains(&parent_id));
        assert_ne!(parent_id, novice);
        let parent = engine.get_variant(&parent_id).await?.expect("parent stored");
        assert_eq!(child.generation, parent.generation + 1);

        let lineage = engine.lineage(id).await?;
        assert_eq!(lineage.len(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn test_preference_updates_both_posteriors() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    let a = engine.create_variant("a", None, 0).await?;
    let b = engine.create_variant("b", None, 0).await?;

    engine.record_preference(&a, &b, "clearer", true).await?;

    let pa = engine.get_variant_stats(&a).await?;
    let pb = engine.get_variant_stats(&b).await?;
    assert!((pa.alpha - 1.1).abs() < 1e-9);
    assert!((pb.beta - 1.1).abs() < 1e-9);
    assert_eq!(engine.preference_history(&a, 10).await?.len(), 1);

    let err = engine.record_preference(&a, &a, "", false).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
    Ok(())
}

#[tokio::test]
async fn test_prune_keeps_history() -> anyhow::Result<()> {
    let (storage, engine) = in_memory(1).await?;
    let doomed = engine.create_variant("doomed", None, 0).await?;
    for i in 0..25 {
        engine.record_feedback(&format!("t{}", i), &doomed, 0.0, 10.0, 1.0, false, Utc::now()).await?;
    }
    engine.record_preference(&doomed, "someone-else", "", false).await?;

    let pruned = engine.prune(20, 0.05).await?;
    assert_eq!(pruned, vec![doomed.clone()]);
    assert!(engine.get_variant(&doomed).await?.is_none());
    assert!(storage.get_posterior(&doomed).await?.is_none());
    assert_eq!(engine.feedback_history(&doomed, 100).await?.len(), 25);
    assert_eq!(engine.preference_history(&doomed, 100).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_linucb_state_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("variants.db");

    let formal;
    let casual;
    {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&path).await?);
        let engine = engine_with(storage, 5).await?;
        formal = engine.create_variant("Dear {{name}},", None, 0).await?;
        casual = engine.create_variant("hey {{name}}!", None, 0).await?;
        for _ in 0..20 {
            engine.record_contextual_reward(&formal, &[1.0, 0.0], 1.0).await?;
            engine.record_contextual_reward(&formal, &[0.0, 1.0], 0.0).await?;
            engine.record_contextual_reward(&casual, &[1.0, 0.0], 0.0).await?;
            engine.record_contextual_reward(&casual, &[0.0, 1.0], 1.0).await?;
        }
        engine.close().await?;
    }

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&path).await?);
    let engine = engine_with(storage, 5).await?;
    let candidates = vec![formal.clone(), casual.clone()];
    engine.decay_exploration(0.1, 0.1);

    assert_eq!(engine.linucb_select(&candidates, &[1.0, 0.0]).await?, formal);
    assert_eq!(engine.linucb_select(&candidates, &[0.0, 1.0]).await?, casual);
    assert!(matches!(
        engine.linucb_select(&candidates, &[1.0]).await,
        Err(EngineError::InvalidArgument(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_closed_engine_fails_with_storage_error() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    engine.close().await?;
    let err = engine.create_variant("late", None, 0).await.unwrap_err();
    assert!(err.is_storage());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_feedback_and_preferences() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    let engine = Arc::new(engine);
    let a = engine.create_variant("a", None, 0).await?;
    let b = engine.create_variant("b", None, 0).await?;

    let mut handles = Vec::new();
    for i in 0..30 {
        let engine = engine.clone();
        let (a, b) = (a.clone(), b.clone());
        handles.push(tokio::spawn(async move {
            engine.record_feedback(&format!("t{}", i), &a, 1.0, 1.0, 1.0, true, Utc::now()).await?;
            engine.record_preference(&b, &a, "", false).await?;
            Ok::<_, EngineError>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let pa = engine.get_variant_stats(&a).await?;
    assert_eq!(pa.total_trials, 30);
    assert!((pa.alpha - 31.0).abs() < 1e-9);
    assert!((pa.beta - (1.0 + 30.0 * 0.1)).abs() < 1e-9);
    let pb = engine.get_variant_stats(&b).await?;
    assert!((pb.alpha - (1.0 + 30.0 * 0.1)).abs() < 1e-9);
    Ok(())
}

/// Storage that refuses every preference write
struct NoPreferenceStorage {
    inner: SqliteStorage,
}

#[async_trait]
impl Storage for NoPreferenceStorage {
    async fn insert_variant(&self, variant: &Variant) -> prompt_evolver::Result<()> {
        self.inner.insert_variant(variant).await
    }
    async fn get_variant(&self, id: &str) -> prompt_evolver::Result<Option<Variant>> {
        self.inner.get_variant(id).await
    }
    async fn list_variants(&self) -> prompt_evolver::Result<Vec<Variant>> {
        self.inner.list_variants().await
    }
    async fn get_posterior(&self, variant_id: &str) -> prompt_evolver::Result<Option<Posterior>> {
        self.inner.get_posterior(variant_id).await
    }
    async fn put_posterior(&self, posterior: &Posterior) -> prompt_evolver::Result<()> {
        self.inner.put_posterior(posterior).await
    }
    async fn record_feedback(&self, event: &FeedbackEvent, posterior: &Posterior) -> prompt_evolver::Result<()> {
        self.inner.record_feedback(event, posterior).await
    }
    async fn record_preference(
        &self,
        _comparison: &PreferenceComparison,
        _winner: &Posterior,
        _loser: &Posterior,
    ) -> prompt_evolver::Result<()> {
        Err(EngineError::StoreClosed)
    }
    async fn append_observation(&self, observation: &ContextualObservation) -> prompt_evolver::Result<()> {
        self.inner.append_observation(observation).await
    }
    async fn list_observations(&self) -> prompt_evolver::Result<Vec<ContextualObservation>> {
        self.inner.list_observations().await
    }
    async fn top_by_reward(&self, limit: usize, min_trials: u64) -> prompt_evolver::Result<Vec<(Variant, Posterior)>> {
        self.inner.top_by_reward(limit, min_trials).await
    }
    async fn prune_candidates(&self, min_trials: u64, max_win_rate: f64) -> prompt_evolver::Result<Vec<String>> {
        self.inner.prune_candidates(min_trials, max_win_rate).await
    }
    async fn delete_variant(&self, id: &str) -> prompt_evolver::Result<bool> {
        self.inner.delete_variant(id).await
    }
    async fn feedback_history(&self, variant_id: &str, limit: usize) -> prompt_evolver::Result<Vec<FeedbackEvent>> {
        self.inner.feedback_history(variant_id, limit).await
    }
    async fn preference_history(&self, variant_id: &str, limit: usize) -> prompt_evolver::Result<Vec<PreferenceComparison>> {
        self.inner.preference_history(variant_id, limit).await
    }
    async fn close(&self) -> prompt_evolver::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_failed_preference_write_changes_nothing() -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(NoPreferenceStorage { inner: SqliteStorage::open_in_memory()? });
    let engine = engine_with(storage, 1).await?;
    let a = engine.create_variant("a", None, 0).await?;
    let b = engine.create_variant("b", None, 0).await?;

    let err = engine.record_preference(&a, &b, "tone", true).await.unwrap_err();
    assert!(err.is_storage());

    assert_eq!(engine.get_variant_stats(&a).await?, Posterior::prior(a.clone()));
    assert_eq!(engine.get_variant_stats(&b).await?, Posterior::prior(b.clone()));
    assert!(engine.preference_history(&a, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_prune_ignores_posteriors_without_variant() -> anyhow::Result<()> {
    let (_, engine) = in_memory(1).await?;
    for i in 0..25 {
        engine.record_feedback(&format!("t{}", i), "never-created", 0.0, 10.0, 1.0, false, Utc::now()).await?;
    }

    assert!(engine.prune(20, 0.05).await?.is_empty());
    assert_eq!(engine.get_variant_stats("never-created").await?.total_trials, 25);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory()?);
    let mut config = Config::default();
    config.engine.significance_level = 2.0;

    let result = PromptEngine::new(storage, Arc::new(SpliceGenerator), config).await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    Ok(())
}
