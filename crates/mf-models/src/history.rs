//! Append-only state history
//!
//! One entry per state change. Entries are never updated or deleted; the
//! latest entry's `to_state` always equals the order's current state.

use chrono::{DateTime, Utc};
use mf_core::traits::{Entity, Id, Identifiable};
use serde::{Deserialize, Serialize};

use crate::order::OrderState;

/// Audit record for a single order state change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateHistoryEntry {
    pub id: Option<Id>,
    pub order_id: Option<Id>,
    /// None for the first entry (order creation)
    pub from_state: Option<OrderState>,
    pub to_state: OrderState,
    pub actor_id: Id,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StateHistoryEntry {
    pub fn new(
        from_state: Option<OrderState>,
        to_state: OrderState,
        actor_id: Id,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            order_id: None,
            from_state,
            to_state,
            actor_id,
            note: None,
            created_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether this entry records the order's creation
    pub fn is_initial(&self) -> bool {
        self.from_state.is_none()
    }
}

impl Identifiable for StateHistoryEntry {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

impl Entity for StateHistoryEntry {
    const TABLE_NAME: &'static str = "order_state_history";
    const TYPE_NAME: &'static str = "StateHistoryEntry";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_entry_has_no_from_state() {
        let entry = StateHistoryEntry::new(None, OrderState::Draft, 1, Utc::now());
        assert!(entry.is_initial());
        assert_eq!(entry.to_state, OrderState::Draft);
    }

    #[test]
    fn transition_entry_keeps_both_states() {
        let entry = StateHistoryEntry::new(
            Some(OrderState::Draft),
            OrderState::Scheduled,
            2,
            Utc::now(),
        )
        .with_note("rescheduled by dispatcher");
        assert!(!entry.is_initial());
        assert_eq!(entry.from_state, Some(OrderState::Draft));
        assert!(entry.note.is_some());
    }
}
