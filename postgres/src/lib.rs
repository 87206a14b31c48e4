//! `PostgreSQL` Campaign Store for the red packet service.
//!
//! This crate provides the durable system of record. It implements the
//! `CampaignStore` and `DeadLetterQueue` traits from `redpacket-core` with sqlx
//! and supports:
//!
//! - Transactional campaign creation (metadata and every tier, or nothing)
//! - Idempotent claim recording keyed by `(campaign_id, user_id)`
//! - Tier counters that can never exceed their initial totals
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use redpacket_postgres::PostgresCampaignStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresCampaignStore::new("postgres://localhost/redpacket", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;

pub use dead_letter_queue::PostgresDeadLetterQueue;

use chrono::{DateTime, Utc};
use redpacket_core::BoxFuture;
use redpacket_core::campaign::{Campaign, CampaignId, NewCampaign, TierCounter};
use redpacket_core::claim::ClaimEvent;
use redpacket_core::store::{AuditRecord, CampaignStore, RecordOutcome, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Postgres error code for a foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// `PostgreSQL`-backed Campaign Store.
#[derive(Clone)]
pub struct PostgresCampaignStore {
    pool: PgPool,
}

impl PostgresCampaignStore {
    /// Connect with a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to campaign store");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool, shared with the dead-letter queue.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_campaign(&self, campaign: &NewCampaign) -> Result<Campaign, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO campaign (name, start_time, end_time)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(&campaign.name)
        .bind(campaign.start_time)
        .bind(campaign.end_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert campaign", e))?;

        for (&amount, &count) in &campaign.inventory {
            sqlx::query(
                r"
                INSERT INTO campaign_inventory (campaign_id, amount, initial_total)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(id)
            .bind(amount)
            .bind(count)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert tier", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit campaign", e))?;

        tracing::info!(
            campaign_id = id,
            name = %campaign.name,
            tiers = campaign.inventory.len(),
            "Campaign persisted"
        );

        Ok(Campaign {
            id: CampaignId::new(id),
            name: campaign.name.clone(),
            start_time: campaign.start_time,
            end_time: campaign.end_time,
        })
    }

    async fn record(&self, event: &ClaimEvent) -> Result<RecordOutcome, StoreError> {
        let campaign_id = event.campaign_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        // Step 1: append the audit row; a conflict means this is a redelivery
        let inserted: Option<i64> = sqlx::query_scalar(
            r"
            INSERT INTO claim_log (user_id, campaign_id, amount, claimed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (campaign_id, user_id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(&event.user_id)
        .bind(campaign_id.get())
        .bind(event.amount)
        .bind(event.timestamp)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::UnknownTier {
                    campaign_id,
                    amount: event.amount,
                }
            } else {
                db_error("Failed to append claim log", e)
            }
        })?;

        if inserted.is_none() {
            rollback(tx, "duplicate claim").await;
            return Ok(RecordOutcome::Duplicate);
        }

        // Step 2: advance the tier counter, bounded by its initial total
        let updated = sqlx::query(
            r"
            UPDATE campaign_inventory
            SET opened_count = opened_count + 1
            WHERE campaign_id = $1 AND amount = $2 AND opened_count < initial_total
            ",
        )
        .bind(campaign_id.get())
        .bind(event.amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to increment tier counter", e))?;

        if updated.rows_affected() == 0 {
            let tier_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM campaign_inventory WHERE campaign_id = $1 AND amount = $2)",
            )
            .bind(campaign_id.get())
            .bind(event.amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to look up tier", e))?;

            rollback(tx, "tier not advanced").await;
            return Err(if tier_exists {
                StoreError::TierExhausted {
                    campaign_id,
                    amount: event.amount,
                }
            } else {
                StoreError::UnknownTier {
                    campaign_id,
                    amount: event.amount,
                }
            });
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit claim", e))?;

        Ok(RecordOutcome::Recorded)
    }
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

/// End a transaction whose writes must not apply.
///
/// A failed rollback still leaves nothing committed: the server discards the
/// transaction when the connection is reset.
async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>, reason: &str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, reason, "Transaction rollback failed");
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(format!("{context}: {e}")),
        _ => StoreError::DatabaseError(format!("{context}: {e}")),
    }
}

impl CampaignStore for PostgresCampaignStore {
    fn create_campaign<'a>(
        &'a self,
        campaign: &'a NewCampaign,
    ) -> BoxFuture<'a, Result<Campaign, StoreError>> {
        Box::pin(self.insert_campaign(campaign))
    }

    fn delete_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            // Tiers and audit rows go with it (ON DELETE CASCADE).
            sqlx::query("DELETE FROM campaign WHERE id = $1")
                .bind(campaign_id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to delete campaign", e))?;

            tracing::warn!(campaign_id = campaign_id.get(), "Campaign deleted");
            Ok(())
        })
    }

    fn get_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<Campaign>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, start_time, end_time FROM campaign WHERE id = $1",
            )
            .bind(campaign_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load campaign", e))?;

            Ok(row.map(|row| Campaign {
                id: CampaignId::new(row.get("id")),
                name: row.get("name"),
                start_time: row.get("start_time"),
                end_time: row.get("end_time"),
            }))
        })
    }

    fn tier_counters(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<TierCounter>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT amount, initial_total, opened_count
                FROM campaign_inventory
                WHERE campaign_id = $1
                ORDER BY amount ASC
                ",
            )
            .bind(campaign_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load tiers", e))?;

            Ok(rows
                .iter()
                .map(|row| TierCounter {
                    amount: row.get("amount"),
                    initial_total: row.get("initial_total"),
                    opened_count: row.get("opened_count"),
                })
                .collect())
        })
    }

    fn record_claim<'a>(
        &'a self,
        event: &'a ClaimEvent,
    ) -> BoxFuture<'a, Result<RecordOutcome, StoreError>> {
        Box::pin(self.record(event))
    }

    fn claim_log(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Vec<AuditRecord>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT user_id, campaign_id, amount, claimed_at, recorded_at
                FROM claim_log
                WHERE campaign_id = $1
                ORDER BY id ASC
                ",
            )
            .bind(campaign_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load claim log", e))?;

            Ok(rows
                .iter()
                .map(|row| AuditRecord {
                    user_id: row.get("user_id"),
                    campaign_id: CampaignId::new(row.get("campaign_id")),
                    amount: row.get("amount"),
                    claimed_at: row.get::<DateTime<Utc>, _>("claimed_at"),
                    recorded_at: row.get::<DateTime<Utc>, _>("recorded_at"),
                })
                .collect())
        })
    }
}
