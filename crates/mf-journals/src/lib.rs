//! # mf-journals
//!
//! Append-only audit trail for service orders. One chronological narrative
//! per order: state transitions and asset sub-state changes both land here,
//! the latter as notes rather than a separate asset-level history table.

pub mod trail;

pub use trail::{Trail, TrailRecorder};
