//! Activity plan entities
//!
//! The ordered checklist an order executes. Items are either derived from the
//! shared catalog (service type x asset type) or authored per order by a
//! dispatcher. Sequence numbers are dense 1..N at creation time.

use chrono::{DateTime, Utc};
use mf_core::traits::{Entity, Id, Identifiable};
use serde::{Deserialize, Serialize};

/// Where a plan item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanOrigin {
    /// Inherited from the activity catalog
    Catalog,
    /// Authored by a dispatcher for this order
    Manual,
}

impl PlanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "CATALOG",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CATALOG" => Some(Self::Catalog),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A catalog activity definition, as exposed by the catalog collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    pub id: Id,
    pub name: String,
    /// Catalog execution-order field; plans are resolved in this order
    pub execution_order: i32,
    pub mandatory: bool,
    /// Tracked part this activity consumes, if any
    pub component_id: Option<Id>,
    pub component_qty: Option<f64>,
}

/// One checklist entry bound to an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPlanItem {
    pub id: Option<Id>,
    pub order_id: Option<Id>,
    pub activity_id: Id,
    /// Dense 1..N within the order
    pub sequence: i32,
    pub origin: PlanOrigin,
    pub mandatory: bool,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub component_id: Option<Id>,
    pub component_qty: Option<f64>,
}

impl ActivityPlanItem {
    pub fn from_catalog(definition: &ActivityDefinition, sequence: i32) -> Self {
        Self {
            id: None,
            order_id: None,
            activity_id: definition.id,
            sequence,
            origin: PlanOrigin::Catalog,
            mandatory: definition.mandatory,
            executed: false,
            executed_at: None,
            component_id: definition.component_id,
            component_qty: definition.component_qty,
        }
    }

    pub fn manual(activity_id: Id, sequence: i32, mandatory: bool) -> Self {
        Self {
            id: None,
            order_id: None,
            activity_id,
            sequence,
            origin: PlanOrigin::Manual,
            mandatory,
            executed: false,
            executed_at: None,
            component_id: None,
            component_qty: None,
        }
    }

    pub fn consumes_part(&self) -> bool {
        self.component_id.is_some()
    }
}

impl Identifiable for ActivityPlanItem {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

impl Entity for ActivityPlanItem {
    const TABLE_NAME: &'static str = "activity_plan_items";
    const TYPE_NAME: &'static str = "ActivityPlanItem";
}
