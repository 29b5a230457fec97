//! # mf-models
//!
//! Domain entities for Maintflow RS: service orders, their attached assets,
//! activity plans, the append-only state history, and the sequence counter
//! backing order numbering.

pub mod activity_plan;
pub mod history;
pub mod order;
pub mod order_asset;
pub mod sequence;

pub use activity_plan::{ActivityDefinition, ActivityPlanItem, PlanOrigin};
pub use history::StateHistoryEntry;
pub use order::{OrderState, Priority, ServiceOrder};
pub use order_asset::{AssetProgress, OrderAsset};
pub use sequence::{DocumentType, OrderSequenceCounter};
