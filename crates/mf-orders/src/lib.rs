//! # mf-orders
//!
//! The service order lifecycle engine:
//!
//! - [`state_machine`]: the authoritative transition table with guards and
//!   side effects
//! - [`asset_ledger`]: attachment and sub-progress of the physical assets an
//!   order covers
//! - [`commands`]: validated command payloads for the orchestrator operations
//! - [`orchestrator`]: the façade external callers use; everything else in
//!   this workspace is composed behind it

pub mod asset_ledger;
pub mod commands;
pub mod orchestrator;
pub mod state_machine;

pub use asset_ledger::{AssetAdvance, AssetLedger, AssetSpec};
pub use commands::*;
pub use orchestrator::OrderOrchestrator;
pub use state_machine::{OrderStateMachine, Transition, TransitionOutcome};
