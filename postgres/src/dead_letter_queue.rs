//! Dead Letter Queue (DLQ) for claim events the recorder could not persist.
//!
//! An event lands here after exhausting its retries or failing with a data
//! error. The entry keeps the full event so it can be replayed once the cause
//! is fixed.

use chrono::{DateTime, Utc};
use redpacket_core::BoxFuture;
use redpacket_core::campaign::CampaignId;
use redpacket_core::claim::ClaimEvent;
use redpacket_core::store::{DeadLetter, DeadLetterQueue, DeadLetterStatus, StoreError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL`-based Dead Letter Queue stored in the `failed_claims` table.
///
/// # Example
///
/// ```no_run
/// use redpacket_core::store::{DeadLetterQueue, DeadLetterStatus};
/// use redpacket_postgres::PostgresDeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// if let Some(entry) = pending.first() {
///     dlq.update_status(entry.id, DeadLetterStatus::Processing).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    /// Create a queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List entries with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: i64,
    ) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, user_id, campaign_id, amount, claimed_at,
                error_message, attempts, first_failed_at, status
            FROM failed_claims
            WHERE status = $1
            ORDER BY first_failed_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(row_to_dead_letter).collect()
    }

    /// Count entries per status, for operators.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    pub async fn count_by_status(&self, status: DeadLetterStatus) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM failed_claims WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

fn row_to_dead_letter(row: &PgRow) -> Result<DeadLetter, StoreError> {
    let status_str: String = row.get("status");
    let status = DeadLetterStatus::parse(&status_str)?;

    Ok(DeadLetter {
        id: row.get("id"),
        event: ClaimEvent::new(
            row.get::<String, _>("user_id"),
            CampaignId::new(row.get("campaign_id")),
            row.get("amount"),
            row.get::<DateTime<Utc>, _>("claimed_at"),
        ),
        error_message: row.get("error_message"),
        attempts: row.get("attempts"),
        failed_at: row.get("first_failed_at"),
        status,
    })
}

impl DeadLetterQueue for PostgresDeadLetterQueue {
    fn push<'a>(
        &'a self,
        event: &'a ClaimEvent,
        error_message: &'a str,
        attempts: i32,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let id: i64 = sqlx::query_scalar(
                r"
                INSERT INTO failed_claims (
                    user_id, campaign_id, amount, claimed_at, error_message, attempts
                ) VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                ",
            )
            .bind(&event.user_id)
            .bind(event.campaign_id.get())
            .bind(event.amount)
            .bind(event.timestamp)
            .bind(error_message)
            .bind(attempts)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            tracing::warn!(
                dlq_id = id,
                campaign_id = event.campaign_id.get(),
                user_id = %event.user_id,
                amount = event.amount,
                error = error_message,
                attempts,
                "Claim event added to Dead Letter Queue"
            );

            Ok(id)
        })
    }

    fn list_pending(&self, limit: i64) -> BoxFuture<'_, Result<Vec<DeadLetter>, StoreError>> {
        Box::pin(self.list_by_status(DeadLetterStatus::Pending, limit))
    }

    fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let resolved = matches!(
                status,
                DeadLetterStatus::Resolved | DeadLetterStatus::Discarded
            );
            sqlx::query(
                r"
                UPDATE failed_claims
                SET status = $1,
                    last_failed_at = NOW(),
                    resolved_at = CASE WHEN $2 THEN NOW() ELSE NULL END
                WHERE id = $3
                ",
            )
            .bind(status.as_str())
            .bind(resolved)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
            Ok(())
        })
    }
}
