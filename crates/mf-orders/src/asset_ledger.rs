//! Asset assignment ledger
//!
//! Tracks which physical assets an order covers and each asset's own
//! sub-progress. The per-asset machine is strictly PENDING → IN_PROGRESS →
//! COMPLETED; the cross-entity guard (order cannot finish with open assets)
//! lives in the state machine, not here.

use chrono::{DateTime, Utc};
use mf_core::error::{MfError, ValidationErrors};
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::order_asset::{AssetProgress, OrderAsset};
use serde::{Deserialize, Serialize};

/// One requested asset attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub asset_id: Id,
    pub asset_type_id: Id,
    pub label: String,
}

/// What an asset advance changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetAdvance {
    pub from: AssetProgress,
    pub to: AssetProgress,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AssetLedger;

impl AssetLedger {
    /// Build the OrderAsset rows for an order.
    ///
    /// Requires at least one asset, rejects duplicate asset ids within the
    /// call, and rejects assets whose type is inconsistent with what the
    /// plan resolver already resolved for the order (resolution happens
    /// first, then attachment).
    pub fn attach_assets(
        &self,
        specs: &[AssetSpec],
        resolved_asset_type: Id,
    ) -> MfResult<Vec<OrderAsset>> {
        let mut errors = ValidationErrors::new();
        if specs.is_empty() {
            errors.add("assets", "at least one asset is required");
        }

        let mut seen = std::collections::HashSet::new();
        for spec in specs {
            if !seen.insert(spec.asset_id) {
                errors.add(
                    "assets",
                    format!("asset {} attached more than once", spec.asset_id),
                );
            }
            if spec.asset_type_id != resolved_asset_type {
                errors.add(
                    "assets",
                    format!(
                        "asset {} has type {} but the order's plan was resolved for type {}",
                        spec.asset_id, spec.asset_type_id, resolved_asset_type
                    ),
                );
            }
        }
        errors.into_result()?;

        Ok(specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| OrderAsset::new(spec.asset_id, idx as i32 + 1, spec.label.clone()))
            .collect())
    }

    /// Advance one asset's sub-state. No skipping, no regression.
    pub fn advance(
        &self,
        asset: &mut OrderAsset,
        to: AssetProgress,
        now: DateTime<Utc>,
    ) -> MfResult<AssetAdvance> {
        let from = asset.progress;
        if from.successor() != Some(to) {
            return Err(MfError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        match to {
            AssetProgress::InProgress => asset.started_at = Some(now),
            AssetProgress::Completed => asset.finished_at = Some(now),
            AssetProgress::Pending => {}
        }
        asset.progress = to;
        Ok(AssetAdvance { from, to })
    }
}
