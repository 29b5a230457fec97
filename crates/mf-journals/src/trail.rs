//! Audit trail recorder
//!
//! The public contract is pure append: entries are never updated or deleted.
//! Entries are built here and persisted by the store as part of the same
//! atomic commit as the state write, so a transition that cannot write its
//! history entry rolls back entirely.

use chrono::{DateTime, Utc};
use mf_core::error::MfError;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::history::StateHistoryEntry;
use mf_models::order::OrderState;
use mf_models::order_asset::{AssetProgress, OrderAsset};

/// Builds history entries for a single order's trail
#[derive(Debug, Default, Clone, Copy)]
pub struct TrailRecorder;

impl TrailRecorder {
    /// Entry for the order's creation (no previous state).
    pub fn creation(
        &self,
        to_state: OrderState,
        actor_id: Id,
        at: DateTime<Utc>,
    ) -> StateHistoryEntry {
        StateHistoryEntry::new(None, to_state, actor_id, at)
    }

    /// Entry for a state transition.
    pub fn append(
        &self,
        from_state: OrderState,
        to_state: OrderState,
        actor_id: Id,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> StateHistoryEntry {
        let mut entry = StateHistoryEntry::new(Some(from_state), to_state, actor_id, at);
        if let Some(note) = note {
            entry = entry.with_note(note);
        }
        entry
    }

    /// Entry for an asset sub-state change, recorded as a note on the parent
    /// order's trail. The order state is unchanged, so from and to are both
    /// the current state and the "latest entry matches current state"
    /// invariant keeps holding.
    pub fn asset_advanced(
        &self,
        order_state: OrderState,
        asset: &OrderAsset,
        from: AssetProgress,
        to: AssetProgress,
        actor_id: Id,
        at: DateTime<Utc>,
    ) -> StateHistoryEntry {
        StateHistoryEntry::new(Some(order_state), order_state, actor_id, at).with_note(format!(
            "asset {} ({}): {} -> {}",
            asset.asset_id, asset.label, from, to
        ))
    }

    /// Entry for a checklist activity marked executed.
    pub fn activity_executed(
        &self,
        order_state: OrderState,
        activity_id: Id,
        sequence: i32,
        actor_id: Id,
        at: DateTime<Utc>,
    ) -> StateHistoryEntry {
        StateHistoryEntry::new(Some(order_state), order_state, actor_id, at).with_note(format!(
            "activity {} (step {}) executed",
            activity_id, sequence
        ))
    }
}

/// Read-side view over an order's history entries
pub struct Trail<'a> {
    entries: &'a [StateHistoryEntry],
}

impl<'a> Trail<'a> {
    pub fn new(entries: &'a [StateHistoryEntry]) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&StateHistoryEntry> {
        self.entries.last()
    }

    /// Entries that changed the order state (excludes asset/activity notes).
    pub fn transitions(&self) -> impl Iterator<Item = &StateHistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.from_state != Some(e.to_state))
    }

    /// The latest entry's `to_state` must equal the order's current state.
    pub fn verify_consistent_with(&self, current: OrderState) -> MfResult<()> {
        match self.latest() {
            Some(latest) if latest.to_state == current => Ok(()),
            Some(latest) => Err(MfError::Internal(format!(
                "history out of sync: latest entry says {}, order says {}",
                latest.to_state, current
            ))),
            None => Err(MfError::Internal(
                "order has no history entries".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> OrderAsset {
        OrderAsset::new(11, 1, "Chiller A")
    }

    #[test]
    fn creation_entry_is_initial() {
        let entry = TrailRecorder.creation(OrderState::Draft, 1, Utc::now());
        assert!(entry.is_initial());
        assert_eq!(entry.to_state, OrderState::Draft);
    }

    #[test]
    fn asset_note_keeps_order_state_unchanged() {
        let entry = TrailRecorder.asset_advanced(
            OrderState::InProgress,
            &asset(),
            AssetProgress::Pending,
            AssetProgress::InProgress,
            5,
            Utc::now(),
        );
        assert_eq!(entry.from_state, Some(OrderState::InProgress));
        assert_eq!(entry.to_state, OrderState::InProgress);
        let note = entry.note.unwrap();
        assert!(note.contains("asset 11"));
        assert!(note.contains("PENDING -> IN_PROGRESS"));
    }

    #[test]
    fn trail_verifies_latest_against_current_state() {
        let now = Utc::now();
        let entries = vec![
            TrailRecorder.creation(OrderState::Draft, 1, now),
            TrailRecorder.append(OrderState::Draft, OrderState::Scheduled, 1, now, None),
        ];
        let trail = Trail::new(&entries);
        assert!(trail.verify_consistent_with(OrderState::Scheduled).is_ok());
        assert!(trail.verify_consistent_with(OrderState::Draft).is_err());
    }

    #[test]
    fn transitions_exclude_sub_state_notes() {
        let now = Utc::now();
        let entries = vec![
            TrailRecorder.creation(OrderState::Draft, 1, now),
            TrailRecorder.append(OrderState::Draft, OrderState::Scheduled, 1, now, None),
            TrailRecorder.asset_advanced(
                OrderState::Scheduled,
                &asset(),
                AssetProgress::Pending,
                AssetProgress::InProgress,
                2,
                now,
            ),
        ];
        let trail = Trail::new(&entries);
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.transitions().count(), 2);
    }

    #[test]
    fn empty_trail_is_inconsistent() {
        let entries: Vec<StateHistoryEntry> = Vec::new();
        assert!(Trail::new(&entries)
            .verify_consistent_with(OrderState::Draft)
            .is_err());
    }
}
