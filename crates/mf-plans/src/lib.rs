//! # mf-plans
//!
//! Turns an order's (service type, asset types) into the ordered checklist of
//! activities to execute, either from the shared catalog or from a
//! dispatcher-authored override list.

pub mod resolver;

pub use resolver::{ActivityCatalog, ManualPlanItem, PlanResolver, ResolvedPlan};
