//! SQLite-based persistent storage for variants, posteriors and history

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Storage;
use crate::error::{EngineError, Result};
use crate::types::{ContextualObservation, FeedbackEvent, Posterior, PreferenceComparison, Variant};

const VARIANT_COLUMNS: &str = "v.id, v.content, v.parent_id, v.generation, v.created_at";
const POSTERIOR_COLUMNS: &str =
    "p.variant_id, p.alpha, p.beta, p.total_trials, p.avg_reward, p.avg_latency_ms, p.avg_cost";

/// SQLite-based variant store
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a store at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        info!("Opened variant store at {}", path.display());
        Ok(Self { conn: Mutex::new(Some(conn)) })
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(Some(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS variants (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                parent_id TEXT,
                generation INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- One row per variant; deleted together with it
            CREATE TABLE IF NOT EXISTS posteriors (
                variant_id TEXT PRIMARY KEY,
                alpha REAL NOT NULL DEFAULT 1.0,
                beta REAL NOT NULL DEFAULT 1.0,
                total_trials INTEGER NOT NULL DEFAULT 0,
                avg_reward REAL NOT NULL DEFAULT 0.0,
                avg_latency_ms REAL NOT NULL DEFAULT 0.0,
                avg_cost REAL NOT NULL DEFAULT 0.0
            );

            -- History tables keep variant ids as plain columns so they outlive pruning
            CREATE TABLE IF NOT EXISTS feedback_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                variant_id TEXT NOT NULL,
                reward REAL NOT NULL,
                latency_ms REAL NOT NULL,
                token_cost REAL NOT NULL,
                success INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS preference_comparisons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                winner_id TEXT NOT NULL,
                loser_id TEXT NOT NULL,
                context TEXT NOT NULL,
                human_feedback INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contextual_observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                variant_id TEXT NOT NULL,
                features TEXT NOT NULL,
                reward REAL NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_variants_created ON variants(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_posteriors_reward ON posteriors(avg_reward DESC);
            CREATE INDEX IF NOT EXISTS idx_feedback_variant ON feedback_events(variant_id);
            CREATE INDEX IF NOT EXISTS idx_preference_winner ON preference_comparisons(winner_id);
            CREATE INDEX IF NOT EXISTS idx_preference_loser ON preference_comparisons(loser_id);
        "#)?;

        Ok(())
    }

    fn variant_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Variant> {
        let generation: i64 = row.get(offset + 3)?;
        let created_at: String = row.get(offset + 4)?;
        Ok(Variant {
            id: row.get(offset)?,
            content: row.get(offset + 1)?,
            parent_id: row.get(offset + 2)?,
            generation: generation.max(0) as u32,
            created_at: parse_timestamp(&created_at, offset + 4)?,
        })
    }

    fn posterior_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Posterior> {
        let total_trials: i64 = row.get(offset + 3)?;
        Ok(Posterior {
            variant_id: row.get(offset)?,
            alpha: row.get(offset + 1)?,
            beta: row.get(offset + 2)?,
            total_trials: total_trials.max(0) as u64,
            avg_reward: row.get(offset + 4)?,
            avg_latency_ms: row.get(offset + 5)?,
            avg_cost: row.get(offset + 6)?,
        })
    }

    fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<FeedbackEvent> {
        let timestamp: String = row.get(6)?;
        Ok(FeedbackEvent {
            task_id: row.get(0)?,
            variant_id: row.get(1)?,
            reward: row.get(2)?,
            latency_ms: row.get(3)?,
            token_cost: row.get(4)?,
            success: row.get(5)?,
            timestamp: parse_timestamp(&timestamp, 6)?,
        })
    }

    fn preference_from_row(row: &Row<'_>) -> rusqlite::Result<PreferenceComparison> {
        let timestamp: String = row.get(4)?;
        Ok(PreferenceComparison {
            winner_id: row.get(0)?,
            loser_id: row.get(1)?,
            context: row.get(2)?,
            human_feedback: row.get(3)?,
            timestamp: parse_timestamp(&timestamp, 4)?,
        })
    }

    fn upsert_posterior(conn: &Connection, posterior: &Posterior) -> rusqlite::Result<usize> {
        conn.execute(
            r#"INSERT OR REPLACE INTO posteriors
               (variant_id, alpha, beta, total_trials, avg_reward, avg_latency_ms, avg_cost)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                posterior.variant_id,
                posterior.alpha,
                posterior.beta,
                posterior.total_trials as i64,
                posterior.avg_reward,
                posterior.avg_latency_ms,
                posterior.avg_cost,
            ],
        )
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_variant(&self, variant: &Variant) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EngineError::StoreClosed)?;

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO variants (id, content, parent_id, generation, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                variant.id,
                variant.content,
                variant.parent_id,
                variant.generation as i64,
                format_timestamp(&variant.created_at),
            ],
        )?;
        Self::upsert_posterior(&tx, &Posterior::prior(variant.id.clone()))?;
        tx.commit()?;

        Ok(())
    }

    async fn get_variant(&self, id: &str) -> Result<Option<Variant>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let variant = conn
            .query_row(
                &format!("SELECT {} FROM variants v WHERE v.id = ?1", VARIANT_COLUMNS),
                params![id],
                |row| Self::variant_from_row(row, 0),
            )
            .optional()?;
        Ok(variant)
    }

    async fn list_variants(&self) -> Result<Vec<Variant>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM variants v ORDER BY v.created_at DESC, v.rowid DESC",
            VARIANT_COLUMNS
        ))?;
        let variants = stmt
            .query_map([], |row| Self::variant_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(variants)
    }

    async fn get_posterior(&self, variant_id: &str) -> Result<Option<Posterior>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let posterior = conn
            .query_row(
                &format!("SELECT {} FROM posteriors p WHERE p.variant_id = ?1", POSTERIOR_COLUMNS),
                params![variant_id],
                |row| Self::posterior_from_row(row, 0),
            )
            .optional()?;
        Ok(posterior)
    }

    async fn put_posterior(&self, posterior: &Posterior) -> Result<()> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;
        Self::upsert_posterior(conn, posterior)?;
        Ok(())
    }

    async fn record_feedback(&self, event: &FeedbackEvent, posterior: &Posterior) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EngineError::StoreClosed)?;

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO feedback_events
               (task_id, variant_id, reward, latency_ms, token_cost, success, timestamp)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                event.task_id,
                event.variant_id,
                event.reward,
                event.latency_ms,
                event.token_cost,
                event.success,
                format_timestamp(&event.timestamp),
            ],
        )?;
        Self::upsert_posterior(&tx, posterior)?;
        tx.commit()?;

        Ok(())
    }

    async fn record_preference(
        &self,
        comparison: &PreferenceComparison,
        winner: &Posterior,
        loser: &Posterior,
    ) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EngineError::StoreClosed)?;

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO preference_comparisons
               (winner_id, loser_id, context, human_feedback, timestamp)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                comparison.winner_id,
                comparison.loser_id,
                comparison.context,
                comparison.human_feedback,
                format_timestamp(&comparison.timestamp),
            ],
        )?;
        Self::upsert_posterior(&tx, winner)?;
        Self::upsert_posterior(&tx, loser)?;
        tx.commit()?;

        Ok(())
    }

    async fn append_observation(&self, observation: &ContextualObservation) -> Result<()> {
        let features = serde_json::to_string(&observation.features)?;
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        conn.execute(
            r#"INSERT INTO contextual_observations (variant_id, features, reward, timestamp)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                observation.variant_id,
                features,
                observation.reward,
                format_timestamp(&observation.timestamp),
            ],
        )?;
        Ok(())
    }

    async fn list_observations(&self) -> Result<Vec<ContextualObservation>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(
            "SELECT variant_id, features, reward, timestamp FROM contextual_observations ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let features: String = row.get(1)?;
                let timestamp: String = row.get(3)?;
                Ok((row.get::<_, String>(0)?, features, row.get::<_, f64>(2)?, timestamp))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut observations = Vec::with_capacity(rows.len());
        for (variant_id, features, reward, timestamp) in rows {
            observations.push(ContextualObservation {
                variant_id,
                features: serde_json::from_str(&features)?,
                reward,
                timestamp: parse_timestamp(&timestamp, 3)?,
            });
        }
        Ok(observations)
    }

    async fn top_by_reward(&self, limit: usize, min_trials: u64) -> Result<Vec<(Variant, Posterior)>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {}, {} FROM variants v
               JOIN posteriors p ON p.variant_id = v.id
               WHERE p.total_trials >= ?1
               ORDER BY p.avg_reward DESC, v.rowid ASC
               LIMIT ?2"#,
            VARIANT_COLUMNS, POSTERIOR_COLUMNS
        ))?;
        let pairs = stmt
            .query_map(params![min_trials as i64, limit as i64], |row| {
                Ok((Self::variant_from_row(row, 0)?, Self::posterior_from_row(row, 5)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    async fn prune_candidates(&self, min_trials: u64, max_win_rate: f64) -> Result<Vec<String>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(
            r#"SELECT p.variant_id FROM posteriors p
               JOIN variants v ON v.id = p.variant_id
               WHERE p.total_trials >= ?1 AND p.alpha / (p.alpha + p.beta) < ?2"#,
        )?;
        let ids = stmt
            .query_map(params![min_trials as i64, max_win_rate], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    async fn delete_variant(&self, id: &str) -> Result<bool> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EngineError::StoreClosed)?;

        let tx = conn.transaction()?;
        let posteriors = tx.execute("DELETE FROM posteriors WHERE variant_id = ?1", params![id])?;
        let variants = tx.execute("DELETE FROM variants WHERE id = ?1", params![id])?;
        tx.commit()?;

        debug!("Deleted variant {} ({} variant rows, {} posterior rows)", id, variants, posteriors);
        Ok(variants + posteriors > 0)
    }

    async fn feedback_history(&self, variant_id: &str, limit: usize) -> Result<Vec<FeedbackEvent>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(
            r#"SELECT task_id, variant_id, reward, latency_ms, token_cost, success, timestamp
               FROM feedback_events WHERE variant_id = ?1
               ORDER BY timestamp DESC, id DESC LIMIT ?2"#,
        )?;
        let events = stmt
            .query_map(params![variant_id, limit as i64], Self::feedback_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    async fn preference_history(&self, variant_id: &str, limit: usize) -> Result<Vec<PreferenceComparison>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(EngineError::StoreClosed)?;

        let mut stmt = conn.prepare(
            r#"SELECT winner_id, loser_id, context, human_feedback, timestamp
               FROM preference_comparisons WHERE winner_id = ?1 OR loser_id = ?1
               ORDER BY timestamp DESC, id DESC LIMIT ?2"#,
        )?;
        let comparisons = stmt
            .query_map(params![variant_id, limit as i64], Self::preference_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comparisons)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| EngineError::Storage(e))?;
            info!("Variant store closed");
        }
        Ok(())
    }
}
