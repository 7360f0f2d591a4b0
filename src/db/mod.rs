pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{QueueItem, QueueStats};

/// Row-level access to the delivery queue. The runner only talks to this trait.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn due_items(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<QueueItem>, sqlx::Error>;

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, sqlx::Error>;

    async fn mark_sent(
        &self,
        id: Uuid,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), sqlx::Error>;

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), sqlx::Error>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, sqlx::Error>;
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueItem>, sqlx::Error> {
        queue::list_due(&self.pool, now, limit).await
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, sqlx::Error> {
        queue::claim(&self.pool, id, now, lease_until).await
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        queue::mark_sent(&self.pool, id, attempts, sent_at).await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        queue::mark_retry(&self.pool, id, attempts, next_attempt_at, error).await
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), sqlx::Error> {
        queue::mark_failed(&self.pool, id, attempts, error).await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, sqlx::Error> {
        queue::stats(&self.pool, now).await
    }
}
