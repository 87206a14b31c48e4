//! Campaigns, reward tiers and the campaign window.
//!
//! A campaign is created once, together with its tiers, and is immutable
//! afterwards. The only state that changes over a campaign's life lives in the
//! Allocation Cache (remaining counters, opened map) and in the durable
//! reporting counters ([`TierCounter::opened_count`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Unique campaign identifier, assigned by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub i64);

impl CampaignId {
    /// Create a campaign id from its raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest amount or packet count a tier may carry.
///
/// The claim script runs on Lua numbers, which hold integers exactly up to
/// 2^53. Campaign totals are held to the same limit.
pub const MAX_TIER_VALUE: i64 = 1 << 53;

/// Reward amount → number of packets of that amount.
///
/// Ordered by amount so every component iterates tiers the same way.
pub type Inventory = BTreeMap<i64, i64>;

/// Durable campaign metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identifier
    pub id: CampaignId,
    /// Human readable name
    pub name: String,
    /// First instant at which claims are accepted
    pub start_time: DateTime<Utc>,
    /// First instant at which claims are rejected again
    pub end_time: DateTime<Utc>,
}

impl Campaign {
    /// The campaign's active window.
    #[must_use]
    pub const fn window(&self) -> CampaignWindow {
        CampaignWindow::new(self.start_time, self.end_time)
    }
}

/// Durable per-tier row: initial total plus the eventually-consistent opened count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounter {
    /// Reward amount of this tier
    pub amount: i64,
    /// Packets configured at creation
    pub initial_total: i64,
    /// Claims recorded by the durability pipeline so far
    pub opened_count: i64,
}

/// Half-open activity interval `[start_time, end_time)` of a campaign.
///
/// Comparisons happen at epoch-second granularity, which is the resolution
/// the cache stores the window with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignWindow {
    /// Inclusive start
    pub start_time: DateTime<Utc>,
    /// Exclusive end
    pub end_time: DateTime<Utc>,
}

impl CampaignWindow {
    /// Create a window.
    #[must_use]
    pub const fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Start as epoch seconds.
    #[must_use]
    pub fn start_epoch(&self) -> i64 {
        self.start_time.timestamp()
    }

    /// End as epoch seconds.
    #[must_use]
    pub fn end_epoch(&self) -> i64 {
        self.end_time.timestamp()
    }

    /// Whether `now` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.contains_epoch(now.timestamp())
    }

    /// Whether the epoch second `now` falls inside `[start, end)`.
    #[must_use]
    pub fn contains_epoch(&self, now: i64) -> bool {
        now >= self.start_epoch() && now < self.end_epoch()
    }

    /// Rebuild a window from the epoch seconds stored in the cache.
    ///
    /// Returns `None` if either value is outside chrono's representable range.
    #[must_use]
    pub fn from_epochs(start: i64, end: i64) -> Option<Self> {
        Some(Self::new(
            DateTime::from_timestamp(start, 0)?,
            DateTime::from_timestamp(end, 0)?,
        ))
    }
}

/// Reasons a campaign creation request is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name was empty or whitespace
    #[error("name is required")]
    MissingName,

    /// No tiers supplied
    #[error("inventory is required")]
    EmptyInventory,

    /// A tier amount was zero or negative
    #[error("invalid amount {0}")]
    InvalidAmount(i64),

    /// A tier count was zero or negative
    #[error("invalid count {count} for amount {amount}")]
    InvalidCount {
        /// Tier amount
        amount: i64,
        /// Offending count
        count: i64,
    },

    /// An amount, a count or the total packet count exceeds [`MAX_TIER_VALUE`]
    #[error("{what} {value} exceeds the maximum of {max}", max = MAX_TIER_VALUE)]
    TooLarge {
        /// Which value: `amount`, `count` or `total packets`
        what: &'static str,
        /// Offending value
        value: i64,
    },

    /// `end_time` is not at least one second after `start_time`
    #[error("end time must be after start time")]
    InvalidWindow,

    /// Claim without a user id
    #[error("user id required")]
    MissingUserId,
}

/// Campaign creation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    /// Campaign name
    pub name: String,
    /// Amount → count
    pub inventory: Inventory,
    /// Window start
    pub start_time: DateTime<Utc>,
    /// Window end (exclusive)
    pub end_time: DateTime<Utc>,
}

impl NewCampaign {
    /// Check every creation rule.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered: empty name, empty
    /// inventory, non-positive amount or count, a value above
    /// [`MAX_TIER_VALUE`], or an empty window.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.inventory.is_empty() {
            return Err(ValidationError::EmptyInventory);
        }
        for (&amount, &count) in &self.inventory {
            if amount <= 0 {
                return Err(ValidationError::InvalidAmount(amount));
            }
            if count <= 0 {
                return Err(ValidationError::InvalidCount { amount, count });
            }
            if amount > MAX_TIER_VALUE {
                return Err(ValidationError::TooLarge {
                    what: "amount",
                    value: amount,
                });
            }
            if count > MAX_TIER_VALUE {
                return Err(ValidationError::TooLarge {
                    what: "count",
                    value: count,
                });
            }
        }
        let total = self.total_packets();
        if total > MAX_TIER_VALUE {
            return Err(ValidationError::TooLarge {
                what: "total packets",
                value: total,
            });
        }
        if self.window().end_epoch() <= self.window().start_epoch() {
            return Err(ValidationError::InvalidWindow);
        }
        Ok(())
    }

    /// The requested window.
    #[must_use]
    pub const fn window(&self) -> CampaignWindow {
        CampaignWindow::new(self.start_time, self.end_time)
    }

    /// Total packets across all tiers, saturating at `i64::MAX`.
    #[must_use]
    pub fn total_packets(&self) -> i64 {
        self.inventory
            .values()
            .fold(0_i64, |total, &count| total.saturating_add(count))
    }
}
