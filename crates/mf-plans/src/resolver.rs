//! Activity plan resolver
//!
//! Resolution happens once per order, before assets are attached. Multi-asset
//! orders share a single plan, which is why heterogeneous asset types are
//! rejected here: one shared checklist implies one asset type.

use async_trait::async_trait;
use mf_core::error::ValidationErrors;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::activity_plan::{ActivityDefinition, ActivityPlanItem, PlanOrigin};
use serde::{Deserialize, Serialize};

/// Activity/asset-type catalog collaborator
#[async_trait]
pub trait ActivityCatalog: Send + Sync {
    /// Catalog activities for the pair, in no particular order; the resolver
    /// sorts by the catalog's execution-order field.
    async fn activities_for(
        &self,
        service_type_id: Id,
        asset_type_id: Id,
    ) -> MfResult<Vec<ActivityDefinition>>;
}

/// Outcome of plan resolution
///
/// An empty catalog is not a failure: callers decide whether to block order
/// creation or proceed with a manually authored plan instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolvedPlan {
    Catalog(Vec<ActivityPlanItem>),
    Empty,
}

impl ResolvedPlan {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn into_items(self) -> Vec<ActivityPlanItem> {
        match self {
            Self::Catalog(items) => items,
            Self::Empty => Vec::new(),
        }
    }
}

/// One entry of a dispatcher-authored override list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPlanItem {
    pub activity_id: Id,
    pub mandatory: bool,
}

/// Resolves an order's checklist from the catalog
pub struct PlanResolver {
    catalog: std::sync::Arc<dyn ActivityCatalog>,
}

impl PlanResolver {
    pub fn new(catalog: std::sync::Arc<dyn ActivityCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the checklist for (service type, asset types).
    ///
    /// All asset types must be equal; a mismatch is a validation error naming
    /// the offending asset type. The plan is resolved once and shared across
    /// the whole order.
    pub async fn resolve_plan(
        &self,
        service_type_id: Id,
        asset_type_ids: &[Id],
    ) -> MfResult<ResolvedPlan> {
        let asset_type_id = homogeneous_asset_type(asset_type_ids)?;

        let mut definitions = self
            .catalog
            .activities_for(service_type_id, asset_type_id)
            .await?;

        if definitions.is_empty() {
            tracing::debug!(
                service_type_id,
                asset_type_id,
                "catalog has no activities for pair"
            );
            return Ok(ResolvedPlan::Empty);
        }

        definitions.sort_by_key(|d| d.execution_order);
        let items = definitions
            .iter()
            .enumerate()
            .map(|(idx, definition)| ActivityPlanItem::from_catalog(definition, idx as i32 + 1))
            .collect();
        Ok(ResolvedPlan::Catalog(items))
    }

    /// Build a dispatcher-authored plan, bypassing the catalog.
    ///
    /// Sequence numbers are re-derived as 1..N regardless of input order.
    pub fn manual_plan(&self, items: &[ManualPlanItem]) -> MfResult<Vec<ActivityPlanItem>> {
        if items.is_empty() {
            return Err(ValidationErrors::single("activities", "can't be empty").into());
        }
        let mut seen = std::collections::HashSet::new();
        for item in items {
            if !seen.insert(item.activity_id) {
                return Err(ValidationErrors::single(
                    "activities",
                    format!("activity {} listed more than once", item.activity_id),
                )
                .into());
            }
        }
        Ok(items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                ActivityPlanItem::manual(item.activity_id, idx as i32 + 1, item.mandatory)
            })
            .collect())
    }
}

/// Validates the homogeneity rule and returns the shared asset type.
pub fn homogeneous_asset_type(asset_type_ids: &[Id]) -> MfResult<Id> {
    let first = *asset_type_ids.first().ok_or_else(|| {
        mf_core::error::MfError::from(ValidationErrors::single(
            "asset_types",
            "at least one asset type is required",
        ))
    })?;
    if let Some(mismatch) = asset_type_ids.iter().find(|&&t| t != first) {
        return Err(ValidationErrors::single(
            "asset_types",
            format!(
                "all assets in an order must share one asset type; asset type {} does not match {}",
                mismatch, first
            ),
        )
        .into());
    }
    Ok(first)
}
