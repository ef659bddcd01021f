//! Durable follow-up jobs.
//!
//! A follow-up is a check-in message due at a later time. Jobs are keyed by
//! `sha256(user_id | due_at)` so scheduling the same check-in twice is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use healthflow_core::error::StoreError;
use healthflow_core::flow::FlowKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Delivered,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A scheduled follow-up check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpJob {
    pub key: String,
    pub user_id: String,
    pub flow: FlowKind,
    pub due_at: DateTime<Utc>,
    pub message: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FollowUpJob {
    pub fn new(user_id: impl Into<String>, flow: FlowKind, due_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            key: job_key(&user_id, due_at),
            user_id,
            flow,
            due_at,
            message: message.into(),
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Idempotency key for a follow-up.
pub fn job_key(user_id: &str, due_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp(due_at).as_bytes());
    hex::encode(hasher.finalize())
}

/// Persistence for follow-up jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn name(&self) -> &str;

    /// Persist a job. Returns `false` when a job with the same key exists.
    async fn schedule(&self, job: &FollowUpJob) -> Result<bool, StoreError>;

    /// Pending jobs due at or before `now`, oldest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FollowUpJob>, StoreError>;

    async fn mark_delivered(&self, key: &str) -> Result<(), StoreError>;

    async fn mark_failed(&self, key: &str, error: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<FollowUpJob>, StoreError>;

    async fn pending_count(&self) -> Result<usize, StoreError>;
}

/// Volatile job store for tests and single-process runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<BTreeMap<String, FollowUpJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn schedule(&self, job: &FollowUpJob) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.key) {
            return Ok(false);
        }
        jobs.insert(job.key.clone(), job.clone());
        Ok(true)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FollowUpJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<FollowUpJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.due_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.due_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_delivered(&self, key: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(key)
            .ok_or_else(|| StoreError::QueryFailed(format!("no job with key {key}")))?;
        job.status = JobStatus::Delivered;
        job.attempts += 1;
        job.last_error = None;
        Ok(())
    }

    async fn mark_failed(&self, key: &str, error: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(key)
            .ok_or_else(|| StoreError::QueryFailed(format!("no job with key {key}")))?;
        job.status = JobStatus::Failed;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<FollowUpJob>, StoreError> {
        Ok(self.jobs.read().await.get(key).cloned())
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count())
    }
}

/// SQLite-backed job store. Survives restarts so the worker can pick up
/// check-ins scheduled by an earlier process.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the job database at `path`.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite job store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follow_up_jobs (
                key         TEXT PRIMARY KEY NOT NULL,
                user_id     TEXT NOT NULL,
                flow        TEXT NOT NULL,
                due_at      TEXT NOT NULL,
                message     TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("follow_up_jobs table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follow_up_due ON follow_up_jobs(status, due_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("due index: {e}")))?;

        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<FollowUpJob, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"));

        let key: String = row.try_get("key").map_err(|e| column("key", e))?;
        let user_id: String = row.try_get("user_id").map_err(|e| column("user_id", e))?;
        let flow: String = row.try_get("flow").map_err(|e| column("flow", e))?;
        let due_at: String = row.try_get("due_at").map_err(|e| column("due_at", e))?;
        let message: String = row.try_get("message").map_err(|e| column("message", e))?;
        let status: String = row.try_get("status").map_err(|e| column("status", e))?;
        let attempts: i64 = row.try_get("attempts").map_err(|e| column("attempts", e))?;
        let last_error: Option<String> = row.try_get("last_error").map_err(|e| column("last_error", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;

        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::QueryFailed(format!("bad timestamp {s}: {e}")))
        };

        Ok(FollowUpJob {
            key,
            user_id,
            flow: flow
                .parse()
                .map_err(|e| StoreError::QueryFailed(format!("flow column: {e}")))?,
            due_at: parse(&due_at)?,
            message,
            status: JobStatus::parse(&status),
            attempts: u32::try_from(attempts).unwrap_or_default(),
            last_error,
            created_at: parse(&created_at)?,
        })
    }

    async fn set_status(&self, key: &str, status: JobStatus, error: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE follow_up_jobs SET status = ?1, attempts = attempts + 1, last_error = ?2 WHERE key = ?3",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::QueryFailed(format!("no job with key {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn schedule(&self, job: &FollowUpJob) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO follow_up_jobs
                (key, user_id, flow, due_at, message, status, attempts, last_error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&job.key)
        .bind(&job.user_id)
        .bind(job.flow.as_str())
        .bind(timestamp(job.due_at))
        .bind(&job.message)
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts))
        .bind(job.last_error.as_deref())
        .bind(timestamp(job.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let inserted = result.rows_affected() > 0;
        debug!(key = %job.key, inserted, "Follow-up scheduled");
        Ok(inserted)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FollowUpJob>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM follow_up_jobs WHERE status = 'pending' AND due_at <= ?1 ORDER BY due_at LIMIT ?2",
        )
        .bind(timestamp(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn mark_delivered(&self, key: &str) -> Result<(), StoreError> {
        self.set_status(key, JobStatus::Delivered, None).await
    }

    async fn mark_failed(&self, key: &str, error: &str) -> Result<(), StoreError> {
        self.set_status(key, JobStatus::Failed, Some(error)).await
    }

    async fn get(&self, key: &str) -> Result<Option<FollowUpJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM follow_up_jobs WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM follow_up_jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn sqlite_store() -> (SqliteJobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let store = SqliteJobStore::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        (store, dir)
    }

    fn job(user: &str, due_in_minutes: i64) -> FollowUpJob {
        FollowUpJob::new(
            user,
            FlowKind::MentalHealth,
            Utc::now() + Duration::minutes(due_in_minutes),
            "How are you feeling today?",
        )
    }

    #[test]
    fn job_key_is_stable() {
        let at = Utc::now();
        assert_eq!(job_key("u1", at), job_key("u1", at));
        assert_ne!(job_key("u1", at), job_key("u2", at));
        assert_eq!(job_key("u1", at).len(), 64);
    }

    #[tokio::test]
    async fn in_memory_schedule_is_idempotent() {
        let store = InMemoryJobStore::new();
        let j = job("u1", -5);
        assert!(store.schedule(&j).await.unwrap());
        assert!(!store.schedule(&j).await.unwrap());
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn in_memory_due_respects_time_and_status() {
        let store = InMemoryJobStore::new();
        let past = job("u1", -10);
        let later = job("u2", 60);
        store.schedule(&past).await.unwrap();
        store.schedule(&later).await.unwrap();

        let due = store.due(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, past.key);

        store.mark_delivered(&past.key).await.unwrap();
        assert!(store.due(Utc::now(), 10).await.unwrap().is_empty());
        assert_eq!(store.get(&past.key).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn in_memory_marking_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        assert!(store.mark_failed("missing", "boom").await.is_err());
    }

    #[tokio::test]
    async fn sqlite_round_trips_a_job() {
        let (store, _dir) = sqlite_store().await;
        let j = job("u1", -1);
        assert!(store.schedule(&j).await.unwrap());

        let loaded = store.get(&j.key).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.flow, FlowKind::MentalHealth);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(timestamp(loaded.due_at), timestamp(j.due_at));
    }

    #[tokio::test]
    async fn sqlite_duplicate_schedule_is_ignored() {
        let (store, _dir) = sqlite_store().await;
        let j = job("u1", 30);
        assert!(store.schedule(&j).await.unwrap());
        assert!(!store.schedule(&j).await.unwrap());
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sqlite_due_orders_oldest_first_and_limits() {
        let (store, _dir) = sqlite_store().await;
        let a = job("a", -30);
        let b = job("b", -20);
        let c = job("c", -10);
        let future = job("d", 30);
        for j in [&c, &a, &future, &b] {
            store.schedule(j).await.unwrap();
        }

        let due = store.due(Utc::now(), 2).await.unwrap();
        let keys: Vec<_> = due.iter().map(|j| j.key.clone()).collect();
        assert_eq!(keys, vec![a.key.clone(), b.key.clone()]);
    }

    #[tokio::test]
    async fn sqlite_failed_jobs_are_not_due_again() {
        let (store, _dir) = sqlite_store().await;
        let j = job("u1", -1);
        store.schedule(&j).await.unwrap();
        store.mark_failed(&j.key, "HTTP 500").await.unwrap();

        assert!(store.due(Utc::now(), 10).await.unwrap().is_empty());
        let loaded = store.get(&j.key).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sqlite_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let j = job("u1", 5);
        {
            let store = SqliteJobStore::new(&url).await.unwrap();
            store.schedule(&j).await.unwrap();
        }
        let reopened = SqliteJobStore::new(&url).await.unwrap();
        assert!(reopened.get(&j.key).await.unwrap().is_some());
    }
}
