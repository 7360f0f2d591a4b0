use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewQueueItem, QueueItem, QueueStats};

pub async fn enqueue(pool: &PgPool, item: &NewQueueItem) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO message_queue (id, recipient, channel, payload, priority, next_attempt_at)
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, now())) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&item.recipient)
    .bind(item.channel)
    .bind(Json(&item.payload))
    .bind(item.priority)
    .bind(item.next_attempt_at)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM message_queue WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Pending rows that are due and not leased, highest priority first, then oldest.
pub async fn list_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM message_queue
         WHERE status = 'pending'
           AND next_attempt_at <= $1
           AND (claimed_until IS NULL OR claimed_until <= $1)
         ORDER BY priority DESC, created_at ASC
         LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Take a lease on a due row. Returns None if another runner got there first.
pub async fn claim(
    pool: &PgPool,
    id: Uuid,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "UPDATE message_queue SET claimed_until = $3, updated_at = now()
         WHERE id = $1
           AND status = 'pending'
           AND next_attempt_at <= $2
           AND (claimed_until IS NULL OR claimed_until <= $2)
         RETURNING *",
    )
    .bind(id)
    .bind(now)
    .bind(lease_until)
    .fetch_optional(pool)
    .await
}

pub async fn mark_sent(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    sent_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE message_queue
         SET status = 'sent', attempts = $2, sent_at = $3, error_message = NULL,
             claimed_until = NULL, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(attempts)
    .bind(sent_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_retry(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE message_queue
         SET attempts = $2, next_attempt_at = $3, error_message = $4,
             claimed_until = NULL, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal failure. `next_attempt_at` is left as it was.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE message_queue
         SET status = 'failed', attempts = $2, error_message = $3,
             claimed_until = NULL, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(attempts)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stats(pool: &PgPool, now: DateTime<Utc>) -> Result<QueueStats, sqlx::Error> {
    sqlx::query_as::<_, QueueStats>(
        "SELECT
             COUNT(*) FILTER (WHERE status = 'pending') AS pending,
             COUNT(*) FILTER (
                 WHERE status = 'pending' AND next_attempt_at <= $1
                   AND (claimed_until IS NULL OR claimed_until <= $1)
             ) AS due,
             COUNT(*) FILTER (WHERE status = 'sent') AS sent,
             COUNT(*) FILTER (WHERE status = 'failed') AS failed
         FROM message_queue",
    )
    .bind(now)
    .fetch_one(pool)
    .await
}
