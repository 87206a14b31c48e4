//! Campaign creation, claims and campaign reads.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use redpacket_core::campaign::{CampaignId, Inventory, NewCampaign};
use redpacket_core::claim::ClaimStatus;
use redpacket_runtime::CampaignOverview;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to create a campaign.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateCampaignRequest {
    /// Campaign name.
    pub name: String,

    /// Amount → packet count. JSON object keys, so amounts arrive as strings.
    pub inventory: BTreeMap<String, i64>,

    /// First instant claims are accepted (RFC 3339).
    pub start_time: DateTime<Utc>,

    /// First instant claims are rejected again (RFC 3339).
    pub end_time: DateTime<Utc>,
}

impl CreateCampaignRequest {
    fn into_new_campaign(self) -> Result<NewCampaign, AppError> {
        let mut inventory = Inventory::new();
        for (key, count) in self.inventory {
            let amount = key
                .trim()
                .parse::<i64>()
                .map_err(|_| AppError::bad_request("inventory keys must be integers"))?;
            // "10" and "010" are different keys but the same tier.
            if inventory.insert(amount, count).is_some() {
                return Err(AppError::validation(format!(
                    "inventory lists amount {amount} more than once"
                )));
            }
        }

        Ok(NewCampaign {
            name: self.name,
            inventory,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }
}

/// Response after creating a campaign.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateCampaignResponse {
    /// Assigned campaign id.
    pub id: i64,
}

/// Request to open a red packet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenRequest {
    /// Claimant.
    pub user_id: String,
}

/// Claim result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenResponse {
    /// `OK`, `ALREADY_OPENED` or `SOLD_OUT`.
    pub status: ClaimStatus,

    /// Allocated amount; on `ALREADY_OPENED` the original one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

/// One tier of a campaign read.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierResponse {
    /// Reward amount.
    pub amount: i64,
    /// Packets configured at creation.
    pub initial_total: i64,
    /// Claims recorded durably so far.
    pub opened_count: i64,
    /// Packets left in the cache; absent when the cache could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// Campaign read.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CampaignResponse {
    /// Campaign id.
    pub id: i64,
    /// Campaign name.
    pub name: String,
    /// Window start.
    pub start_time: DateTime<Utc>,
    /// Window end (exclusive).
    pub end_time: DateTime<Utc>,
    /// Tiers ordered by amount.
    pub tiers: Vec<TierResponse>,
}

impl From<CampaignOverview> for CampaignResponse {
    fn from(overview: CampaignOverview) -> Self {
        Self {
            id: overview.campaign.id.get(),
            name: overview.campaign.name,
            start_time: overview.campaign.start_time,
            end_time: overview.campaign.end_time,
            tiers: overview
                .tiers
                .into_iter()
                .map(|tier| TierResponse {
                    amount: tier.amount,
                    initial_total: tier.initial_total,
                    opened_count: tier.opened_count,
                    remaining: tier.remaining,
                })
                .collect(),
        }
    }
}

fn parse_campaign_id(raw: &str) -> Result<CampaignId, AppError> {
    raw.parse::<i64>()
        .map(CampaignId::new)
        .map_err(|_| AppError::bad_request("invalid campaign id"))
}

/// Create a campaign.
///
/// # Endpoint
///
/// ```text
/// POST /campaign
/// Content-Type: application/json
///
/// {
///   "name": "Spring",
///   "inventory": {"10": 100, "50": 10},
///   "start_time": "2025-01-01T00:00:00Z",
///   "end_time": "2025-01-01T01:00:00Z"
/// }
/// ```
///
/// # Response
///
/// `201 {"id": 1}`; `400` for malformed or invalid input.
///
/// # Errors
///
/// See [`AppError`]'s mapping of campaign errors.
pub async fn create_campaign(
    State(state): State<AppState>,
    body: Result<Json<CreateCampaignRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), AppError> {
    let Json(request) = body?;
    let new = request.into_new_campaign()?;

    let campaign = state.orchestrator.create_campaign(new).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            id: campaign.id.get(),
        }),
    ))
}

/// Open a red packet.
///
/// # Endpoint
///
/// ```text
/// POST /campaign/:id/open
/// Content-Type: application/json
///
/// {"user_id": "alice"}
/// ```
///
/// # Response
///
/// | Outcome | Status | Body |
/// |---|---|---|
/// | allocated | 200 | `{"status": "OK", "amount": 10}` |
/// | repeat claim | 409 | `{"status": "ALREADY_OPENED", "amount": 10}` |
/// | nothing left | 410 | `{"status": "SOLD_OUT"}` |
/// | unknown campaign | 404 | error body, code `CAMPAIGN_NOT_FOUND` |
/// | outside window | 400 | error body, code `CAMPAIGN_INACTIVE` |
///
/// # Errors
///
/// See [`AppError`]'s mapping of campaign errors.
pub async fn open(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<OpenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OpenResponse>), AppError> {
    let campaign_id = parse_campaign_id(&raw_id)?;
    let Json(request) = body?;

    let outcome = state
        .orchestrator
        .open(campaign_id, &request.user_id)
        .await?;

    let status = match outcome.status {
        ClaimStatus::Ok => StatusCode::OK,
        ClaimStatus::AlreadyOpened => StatusCode::CONFLICT,
        ClaimStatus::SoldOut => StatusCode::GONE,
        // The orchestrator turns these into errors.
        ClaimStatus::CampaignInactive | ClaimStatus::CampaignNotFound => {
            return Err(AppError::internal("An internal error occurred"));
        }
    };

    Ok((
        status,
        Json(OpenResponse {
            status: outcome.status,
            amount: outcome.amount,
        }),
    ))
}

/// Read a campaign with its tier counters.
///
/// # Endpoint
///
/// ```text
/// GET /campaign/:id
/// ```
///
/// # Errors
///
/// `404` for an unknown campaign, `400` for a malformed id.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<CampaignResponse>, AppError> {
    let campaign_id = parse_campaign_id(&raw_id)?;
    let overview = state.orchestrator.campaign_overview(campaign_id).await?;
    Ok(Json(overview.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(inventory: &[(&str, i64)]) -> CreateCampaignRequest {
        CreateCampaignRequest {
            name: "Spring".to_string(),
            inventory: inventory
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            start_time: DateTime::<Utc>::UNIX_EPOCH,
            end_time: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn inventory_keys_are_parsed_as_amounts() {
        let new = request(&[("10", 100), (" 50", 10)]).into_new_campaign().unwrap();
        assert_eq!(new.inventory, BTreeMap::from([(10, 100), (50, 10)]));
    }

    #[test]
    fn non_numeric_inventory_key_is_rejected() {
        let err = request(&[("ten", 100)]).into_new_campaign().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn amounts_spelled_twice_are_rejected() {
        let err = request(&[("10", 100), ("010", 5)])
            .into_new_campaign()
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION_ERROR");

        assert!(
            request(&[("10", 100), (" 10", 5)])
                .into_new_campaign()
                .is_err()
        );
    }

    #[test]
    fn sold_out_serializes_without_amount() {
        let body = serde_json::to_value(OpenResponse {
            status: ClaimStatus::SoldOut,
            amount: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"status": "SOLD_OUT"}));
    }

    #[test]
    fn campaign_ids_must_be_integers() {
        assert_eq!(parse_campaign_id("42").unwrap(), CampaignId::new(42));
        assert!(parse_campaign_id("spring").is_err());
    }
}
