//! Order numbering
//!
//! Counters are keyed by (document type, year, month); the counter value is
//! the last issued correlative for that key.

use mf_core::traits::Id;
use serde::{Deserialize, Serialize};

/// Document families sharing the numbering scheme
///
/// The counter store is shared with the rest of the system (quotes use the
/// same table), so the enum covers both even though this core only issues
/// service-order codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    ServiceOrder,
    Quote,
}

impl DocumentType {
    /// Code prefix, e.g. "SO" in "SO-202608-0001"
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::ServiceOrder => "SO",
            Self::Quote => "QT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SO" => Some(Self::ServiceOrder),
            "QT" => Some(Self::Quote),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Monotonically increasing counter row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSequenceCounter {
    pub id: Option<Id>,
    pub document_type: DocumentType,
    pub year: i32,
    pub month: u32,
    /// Last issued correlative for this key
    pub value: i64,
}

impl OrderSequenceCounter {
    pub fn key(&self) -> (DocumentType, i32, u32) {
        (self.document_type, self.year, self.month)
    }
}
