//! Claim outcomes, claim events and the tier-selection policy.

use crate::campaign::CampaignId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result of running the claim script for one `(campaign, user, now)` request.
///
/// The wire names are the strings the claim script returns and the HTTP layer
/// exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// A packet was allocated to the user
    Ok,
    /// The user already holds an allocation; the original amount is returned
    AlreadyOpened,
    /// No tier has packets left
    SoldOut,
    /// `now` is outside `[start_time, end_time)`
    CampaignInactive,
    /// No window is cached for the campaign
    CampaignNotFound,
}

impl ClaimStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::AlreadyOpened => "ALREADY_OPENED",
            Self::SoldOut => "SOLD_OUT",
            Self::CampaignInactive => "CAMPAIGN_INACTIVE",
            Self::CampaignNotFound => "CAMPAIGN_NOT_FOUND",
        }
    }

    /// Parse the wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "ALREADY_OPENED" => Some(Self::AlreadyOpened),
            "SOLD_OUT" => Some(Self::SoldOut),
            "CAMPAIGN_INACTIVE" => Some(Self::CampaignInactive),
            "CAMPAIGN_NOT_FOUND" => Some(Self::CampaignNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus amount, as decided by the claim script.
///
/// `amount` is present for [`ClaimStatus::Ok`] and
/// [`ClaimStatus::AlreadyOpened`], absent otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    /// Decision
    pub status: ClaimStatus,
    /// Allocated (or previously allocated) amount
    pub amount: Option<i64>,
}

impl ClaimOutcome {
    /// A fresh allocation.
    #[must_use]
    pub const fn ok(amount: i64) -> Self {
        Self {
            status: ClaimStatus::Ok,
            amount: Some(amount),
        }
    }

    /// Idempotent replay of an earlier allocation.
    #[must_use]
    pub const fn already_opened(amount: i64) -> Self {
        Self {
            status: ClaimStatus::AlreadyOpened,
            amount: Some(amount),
        }
    }

    /// An outcome that carries no amount.
    #[must_use]
    pub const fn without_amount(status: ClaimStatus) -> Self {
        Self {
            status,
            amount: None,
        }
    }

    /// Build from the raw `(status, amount)` pair the claim script returns.
    ///
    /// The script reports `0` as the amount for statuses without one.
    #[must_use]
    pub fn from_script_reply(status: &str, amount: i64) -> Option<Self> {
        let status = ClaimStatus::parse(status)?;
        Some(match status {
            ClaimStatus::Ok | ClaimStatus::AlreadyOpened => Self {
                status,
                amount: Some(amount),
            },
            _ => Self::without_amount(status),
        })
    }
}

/// A successful allocation on its way from the fast path to the durable store.
///
/// Wire format (JSON): `{"user_id": "...", "campaign_id": 1, "amount": 10, "ts": "RFC3339"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEvent {
    /// Claimant
    pub user_id: String,
    /// Campaign the packet came from
    pub campaign_id: CampaignId,
    /// Allocated amount
    pub amount: i64,
    /// When the allocation was decided
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl ClaimEvent {
    /// Create a claim event.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        campaign_id: CampaignId,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            campaign_id,
            amount,
            timestamp,
        }
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not a claim event.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// How the claim script picks a tier among those with `remaining > 0`.
///
/// Selection affects distribution fairness only. Every policy decrements
/// exactly one tier with a positive counter, so none of them can oversell.
///
/// All policies see candidates sorted by ascending amount and consume a
/// caller-supplied `roll` in `[0, 1)`; policies that are not random ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPolicy {
    /// Every available tier is equally likely
    #[default]
    Uniform,
    /// A tier's chance is proportional to its remaining count
    Weighted,
    /// Always the cheapest available tier
    SmallestFirst,
}

impl TierPolicy {
    /// Name passed to the claim script.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Weighted => "weighted",
            Self::SmallestFirst => "smallest_first",
        }
    }

    /// Pick an index into `remaining`, a list of positive counters sorted by
    /// ascending amount.
    ///
    /// Returns `None` when `remaining` is empty.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn select(&self, remaining: &[i64], roll: f64) -> Option<usize> {
        if remaining.is_empty() {
            return None;
        }
        let roll = roll.clamp(0.0, 1.0);
        let last = remaining.len() - 1;
        match self {
            Self::Uniform => Some(((roll * remaining.len() as f64) as usize).min(last)),
            Self::Weighted => {
                // Widened so any slice of i64 counts sums without overflow.
                let total: i128 = remaining.iter().map(|&count| i128::from(count)).sum();
                let target = ((roll * total as f64) as i128).min(total - 1);
                let mut cumulative: i128 = 0;
                for (index, &count) in remaining.iter().enumerate() {
                    cumulative += i128::from(count);
                    if target < cumulative {
                        return Some(index);
                    }
                }
                Some(last)
            }
            Self::SmallestFirst => Some(0),
        }
    }
}

impl fmt::Display for TierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "weighted" => Ok(Self::Weighted),
            "smallest_first" => Ok(Self::SmallestFirst),
            other => Err(format!("unknown tier policy: {other}")),
        }
    }
}
