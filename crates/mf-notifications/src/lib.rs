//! # mf-notifications
//!
//! Outbound order-event contracts. Delivery itself (email, push, webhooks)
//! is a downstream collaborator; this crate defines the event shape, the
//! sender trait, and two in-process senders (tracing for production logging,
//! memory for tests).
//!
//! Emission is fire-and-forget and always post-commit: a failed delivery is
//! logged and retried downstream, never rolled into the business transition.

pub mod sender;

pub use sender::{
    MemorySender, NotificationSender, NotifyError, OrderEvent, OrderEventKind, TracingSender,
};
