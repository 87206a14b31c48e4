//! Redis Allocation Cache for the red packet service.
//!
//! [`RedisAllocationCache`] implements [`AllocationCache`] on a Redis server.
//! Claim decisions run as a server-side Lua script, so the read-check-write
//! sequence (window, opened map, counters, decrement, record) is indivisible
//! with respect to every other command on the server.
//!
//! # Key Namespace
//!
//! ```text
//! campaign:{id}:window          HASH  start, end (epoch seconds)
//! campaign:{id}:inv:{amount}    INT   remaining packets of that amount
//! campaign:{id}:amounts         SET   configured amounts
//! campaign:{id}:opened          HASH  user_id → amount
//! ```
//!
//! The claim script derives the `inv` keys from the campaign id instead of
//! receiving them in `KEYS`, so all keys of a campaign must live on one node.
//!
//! # Example
//!
//! ```no_run
//! use redpacket_redis::RedisAllocationCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisAllocationCache::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use redpacket_core::cache::{AllocationCache, CacheError, ClaimRequest};
use redpacket_core::campaign::{CampaignId, CampaignWindow, Inventory};
use redpacket_core::claim::ClaimOutcome;
use redpacket_core::BoxFuture;
use std::collections::HashMap;

/// Source of the claim script.
pub const CLAIM_SCRIPT: &str = include_str!("claim.lua");

/// Removes every key of a campaign, including the per-amount counters.
const EVICT_SCRIPT: &str = r"
    local amounts = redis.call('SMEMBERS', KEYS[3])
    for _, amount in ipairs(amounts) do
        redis.call('DEL', 'campaign:' .. ARGV[1] .. ':inv:' .. amount)
    end
    redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
    return #amounts
";

/// Key of the opened map.
#[must_use]
pub fn opened_key(campaign_id: CampaignId) -> String {
    format!("campaign:{campaign_id}:opened")
}

/// Key of the window hash.
#[must_use]
pub fn window_key(campaign_id: CampaignId) -> String {
    format!("campaign:{campaign_id}:window")
}

/// Key of the configured-amounts set.
#[must_use]
pub fn amounts_key(campaign_id: CampaignId) -> String {
    format!("campaign:{campaign_id}:amounts")
}

/// Key of one remaining counter.
#[must_use]
pub fn inventory_key(campaign_id: CampaignId, amount: i64) -> String {
    format!("campaign:{campaign_id}:inv:{amount}")
}

/// Redis-backed Allocation Cache.
///
/// Provides:
/// - Atomic priming via a `MULTI/EXEC` pipeline
/// - Claim decisions via the Lua claim script (`EVALSHA`, falling back to `EVAL`)
/// - Connection pooling and reconnection via `ConnectionManager`
#[derive(Clone)]
pub struct RedisAllocationCache {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Precompiled claim script.
    claim_script: Script,
}

impl RedisAllocationCache {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the client cannot be created or
    /// the first connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(redis_url = %redis_url, "Connected to Redis allocation cache");

        Ok(Self {
            conn_manager,
            claim_script: Script::new(CLAIM_SCRIPT),
        })
    }

    /// Round-trip a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if Redis does not answer.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn prime(
        &self,
        campaign_id: CampaignId,
        window: CampaignWindow,
        inventory: &Inventory,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let opened = opened_key(campaign_id);
        let amounts = amounts_key(campaign_id);

        // Counters, amounts and window become visible together or not at all.
        let mut pipe = redis::pipe();
        pipe.atomic().del(&opened).ignore().del(&amounts).ignore();
        for (&amount, &count) in inventory {
            pipe.set(inventory_key(campaign_id, amount), count)
                .ignore()
                .sadd(&amounts, amount)
                .ignore();
        }
        pipe.hset_multiple(
            window_key(campaign_id),
            &[("start", window.start_epoch()), ("end", window.end_epoch())],
        )
        .ignore();

        let _: () = pipe.query_async(&mut conn).await.map_err(command_error)?;

        tracing::info!(
            campaign_id = campaign_id.get(),
            tiers = inventory.len(),
            start = window.start_epoch(),
            end = window.end_epoch(),
            "Primed campaign in Redis"
        );
        Ok(())
    }

    async fn claim(&self, request: ClaimRequest) -> Result<ClaimOutcome, CacheError> {
        let mut conn = self.conn_manager.clone();
        let campaign_id = request.campaign_id;

        let (status, amount): (String, i64) = self
            .claim_script
            .key(opened_key(campaign_id))
            .key(window_key(campaign_id))
            .key(amounts_key(campaign_id))
            .arg(&request.user_id)
            .arg(request.now.timestamp())
            .arg(campaign_id.get())
            .arg(format!("{:.12}", request.roll))
            .arg(request.policy.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if e.kind() == redis::ErrorKind::TypeError {
                    CacheError::UnexpectedReply(e.to_string())
                } else {
                    command_error(e)
                }
            })?;

        let outcome = ClaimOutcome::from_script_reply(&status, amount)
            .ok_or_else(|| CacheError::UnexpectedReply(format!("[{status}, {amount}]")))?;

        tracing::debug!(
            campaign_id = campaign_id.get(),
            user_id = %request.user_id,
            status = %outcome.status,
            amount = ?outcome.amount,
            "Claim script finished"
        );
        Ok(outcome)
    }

    async fn evict(&self, campaign_id: CampaignId) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let tiers: i64 = Script::new(EVICT_SCRIPT)
            .key(opened_key(campaign_id))
            .key(window_key(campaign_id))
            .key(amounts_key(campaign_id))
            .arg(campaign_id.get())
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;

        tracing::info!(campaign_id = campaign_id.get(), tiers, "Evicted campaign from Redis");
        Ok(())
    }

    async fn read_window(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignWindow>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let (start, end): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(window_key(campaign_id))
            .arg("start")
            .arg("end")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        match (start, end) {
            (Some(start), Some(end)) => CampaignWindow::from_epochs(start, end)
                .map(Some)
                .ok_or_else(|| CacheError::UnexpectedReply(format!("window [{start}, {end})"))),
            _ => Ok(None),
        }
    }

    async fn read_remaining(&self, campaign_id: CampaignId) -> Result<Inventory, CacheError> {
        let mut conn = self.conn_manager.clone();
        let amounts: Vec<i64> = conn
            .smembers(amounts_key(campaign_id))
            .await
            .map_err(command_error)?;
        if amounts.is_empty() {
            return Ok(Inventory::new());
        }

        let keys: Vec<String> = amounts
            .iter()
            .map(|&amount| inventory_key(campaign_id, amount))
            .collect();
        let counts: Vec<Option<i64>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(amounts
            .into_iter()
            .zip(counts)
            .map(|(amount, count)| (amount, count.unwrap_or(0)))
            .collect())
    }
}

fn command_error(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::CommandFailed(e.to_string())
    }
}

impl AllocationCache for RedisAllocationCache {
    fn prime_campaign(
        &self,
        campaign_id: CampaignId,
        window: CampaignWindow,
        inventory: &Inventory,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let inventory = inventory.clone();
        Box::pin(async move { self.prime(campaign_id, window, &inventory).await })
    }

    fn run_claim(&self, request: ClaimRequest) -> BoxFuture<'_, Result<ClaimOutcome, CacheError>> {
        Box::pin(self.claim(request))
    }

    fn evict_campaign(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(self.evict(campaign_id))
    }

    fn window(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<Option<CampaignWindow>, CacheError>> {
        Box::pin(self.read_window(campaign_id))
    }

    fn remaining(&self, campaign_id: CampaignId) -> BoxFuture<'_, Result<Inventory, CacheError>> {
        Box::pin(self.read_remaining(campaign_id))
    }

    fn allocation<'a>(
        &'a self,
        campaign_id: CampaignId,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>, CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.hget(opened_key(campaign_id), user_id)
                .await
                .map_err(command_error)
        })
    }

    fn allocations(
        &self,
        campaign_id: CampaignId,
    ) -> BoxFuture<'_, Result<HashMap<String, i64>, CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.hgetall(opened_key(campaign_id))
                .await
                .map_err(command_error)
        })
    }
}
