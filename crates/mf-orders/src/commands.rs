//! Orchestrator command payloads
//!
//! One struct per façade operation. Derive-level checks cover shape; the
//! richer business checks live in the ledger, resolver, and state machine.

use chrono::{DateTime, Utc};
use mf_core::error::ValidationErrors;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::order::Priority;
use mf_models::order_asset::AssetProgress;
use mf_plans::ManualPlanItem;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::asset_ledger::AssetSpec;

fn validate<T: Validate>(command: &T) -> MfResult<()> {
    command
        .validate()
        .map_err(|e| ValidationErrors::from(e).into())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderCommand {
    pub client_id: Id,
    pub service_type_id: Id,
    pub priority: Option<Priority>,
    #[validate(length(max = 2000, message = "is too long"))]
    pub description: Option<String>,
    #[validate(length(min = 1, message = "at least one asset is required"))]
    pub assets: Vec<AssetSpec>,
    /// Dispatcher-authored checklist; bypasses the catalog when present
    pub manual_plan: Option<Vec<ManualPlanItem>>,
    /// Allow creating the order with no checklist when the catalog is empty
    /// and no manual plan was supplied
    #[serde(default)]
    pub allow_empty_plan: bool,
}

impl CreateOrderCommand {
    pub fn validate_shape(&self) -> MfResult<()> {
        validate(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCommand {
    pub order_id: Id,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTechnicianCommand {
    pub order_id: Id,
    pub technician_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    pub order_id: Id,
    pub technician_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartsShortageCommand {
    pub order_id: Id,
    /// The missing tracked part, when known
    pub component_id: Option<Id>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCommand {
    pub order_id: Id,
    /// Confirmation that the missing parts are now available
    pub parts_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceAssetCommand {
    pub order_id: Id,
    pub asset_id: Id,
    pub to: AssetProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteActivityCommand {
    pub order_id: Id,
    pub activity_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishCommand {
    pub order_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveCommand {
    pub order_id: Id,
    pub approver_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelCommand {
    pub order_id: Id,
    #[validate(length(min = 1, message = "can't be blank"))]
    pub reason: String,
}

impl CancelCommand {
    pub fn validate_shape(&self) -> MfResult<()> {
        validate(self)
    }
}
