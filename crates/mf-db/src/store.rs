//! Order store contract
//!
//! A service order, its attached assets, its activity plan, and its history
//! form one aggregate. The store reads and writes the aggregate as a unit:
//! `commit` either applies everything (state, sub-states, plan flags, new
//! history entries) or nothing.

use async_trait::async_trait;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::activity_plan::ActivityPlanItem;
use mf_models::history::StateHistoryEntry;
use mf_models::order::ServiceOrder;
use mf_models::order_asset::OrderAsset;
use serde::{Deserialize, Serialize};

/// A service order with everything the engine needs to evaluate guards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAggregate {
    pub order: ServiceOrder,
    pub assets: Vec<OrderAsset>,
    pub plan: Vec<ActivityPlanItem>,
    pub history: Vec<StateHistoryEntry>,
}

impl OrderAggregate {
    pub fn new(order: ServiceOrder) -> Self {
        Self {
            order,
            assets: Vec::new(),
            plan: Vec::new(),
            history: Vec::new(),
        }
    }

    /// No OrderAsset rows means the order is single-asset (legacy mode) and
    /// the primary asset field is authoritative.
    pub fn is_multi_asset(&self) -> bool {
        !self.assets.is_empty()
    }

    pub fn all_assets_completed(&self) -> bool {
        self.assets.iter().all(|a| a.is_completed())
    }

    pub fn all_mandatory_activities_executed(&self) -> bool {
        self.plan.iter().filter(|i| i.mandatory).all(|i| i.executed)
    }

    pub fn asset_mut(&mut self, asset_id: Id) -> Option<&mut OrderAsset> {
        self.assets.iter_mut().find(|a| a.asset_id == asset_id)
    }

    pub fn plan_item_mut(&mut self, activity_id: Id) -> Option<&mut ActivityPlanItem> {
        self.plan.iter_mut().find(|i| i.activity_id == activity_id)
    }
}

/// Atomic persistence for order aggregates
///
/// `commit` detects lost races through the order's `lock_version`: when the
/// committed version no longer matches the one the aggregate was loaded with,
/// the call fails with `Conflict` and writes nothing.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a brand-new aggregate, assigning ids throughout.
    async fn insert(&self, aggregate: OrderAggregate) -> MfResult<OrderAggregate>;

    /// Load the freshest committed aggregate.
    async fn load(&self, order_id: Id) -> MfResult<OrderAggregate>;

    /// Load by generated order code.
    async fn load_by_code(&self, code: &str) -> MfResult<OrderAggregate>;

    /// Commit a mutated aggregate atomically, bumping `lock_version`.
    async fn commit(&self, aggregate: OrderAggregate) -> MfResult<OrderAggregate>;
}
