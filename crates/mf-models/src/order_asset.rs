//! Order-asset join entity
//!
//! Binds an order to one physical asset when the order is multi-asset.
//! Absence of rows means the order is single-asset (legacy mode) and the
//! order's primary asset field is authoritative.

use chrono::{DateTime, Utc};
use mf_core::traits::{Entity, Id, Identifiable};
use serde::{Deserialize, Serialize};

/// Per-asset sub-progress, independent of the parent order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetProgress {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl AssetProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    /// The only legal next step, if any (no skipping, no regression).
    pub fn successor(&self) -> Option<AssetProgress> {
        match self {
            Self::Pending => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl std::fmt::Display for AssetProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical asset covered by an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAsset {
    pub id: Option<Id>,
    pub order_id: Option<Id>,
    pub asset_id: Id,
    /// 1-based position within the order
    pub position: i32,
    pub label: String,
    pub progress: AssetProgress,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrderAsset {
    pub fn new(asset_id: Id, position: i32, label: impl Into<String>) -> Self {
        Self {
            id: None,
            order_id: None,
            asset_id,
            position,
            label: label.into(),
            progress: AssetProgress::Pending,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.progress == AssetProgress::Completed
    }
}

impl Identifiable for OrderAsset {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

impl Entity for OrderAsset {
    const TABLE_NAME: &'static str = "order_assets";
    const TYPE_NAME: &'static str = "OrderAsset";
}
