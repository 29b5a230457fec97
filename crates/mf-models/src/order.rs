//! Service order model
//!
//! The unit of scheduled or reactive maintenance work. Mutated exclusively
//! through the state machine in mf-orders; never hard-deleted (cancellation
//! is a terminal state, not a removal).

use chrono::{DateTime, Utc};
use mf_core::traits::{Entity, Id, Identifiable, Lockable, Timestamped};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a service order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Draft,
    Scheduled,
    Assigned,
    InProgress,
    AwaitingParts,
    Executed,
    Approved,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::AwaitingParts => "AWAITING_PARTS",
            Self::Executed => "EXECUTED",
            Self::Approved => "APPROVED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "SCHEDULED" => Some(Self::Scheduled),
            "ASSIGNED" => Some(Self::Assigned),
            "IN_PROGRESS" => Some(Self::InProgress),
            "AWAITING_PARTS" => Some(Self::AwaitingParts),
            "EXECUTED" => Some(Self::Executed),
            "APPROVED" => Some(Self::Approved),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// No further business transition is possible from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Cancelled)
    }

    /// Whether work on the order has begun (start_time is set from here on).
    pub fn is_started(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::AwaitingParts | Self::Executed | Self::Approved
        )
    }

    pub fn all() -> &'static [OrderState] {
        &[
            Self::Draft,
            Self::Scheduled,
            Self::Assigned,
            Self::InProgress,
            Self::AwaitingParts,
            Self::Executed,
            Self::Approved,
            Self::Cancelled,
        ]
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "URGENT" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Service order entity
///
/// `primary_asset_id` is a legacy single-asset field kept populated even for
/// multi-asset orders: when OrderAsset rows exist it is a derived pointer to
/// the first attached asset, never a second source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOrder {
    pub id: Option<Id>,
    /// Generated order code, e.g. "SO-202608-0001"
    pub code: String,
    pub state: OrderState,
    pub priority: Priority,
    pub description: Option<String>,
    pub service_type_id: Id,
    pub client_id: Id,
    pub primary_asset_id: Id,
    pub technician_id: Option<Id>,
    pub approved_by_id: Option<Id>,
    pub parts_shortage: bool,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every committed mutation
    pub lock_version: i32,
}

impl ServiceOrder {
    /// Create a new order in DRAFT
    pub fn new(
        code: impl Into<String>,
        service_type_id: Id,
        client_id: Id,
        primary_asset_id: Id,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            code: code.into(),
            state: OrderState::Draft,
            priority: Priority::default(),
            description: None,
            service_type_id,
            client_id,
            primary_asset_id,
            technician_id: None,
            approved_by_id: None,
            parts_shortage: false,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            approved_at: None,
            cancelled_at: None,
            lock_version: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Identifiable for ServiceOrder {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

impl Timestamped for ServiceOrder {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

impl Lockable for ServiceOrder {
    fn lock_version(&self) -> i32 {
        self.lock_version
    }
}

impl Entity for ServiceOrder {
    const TABLE_NAME: &'static str = "service_orders";
    const TYPE_NAME: &'static str = "ServiceOrder";
}
