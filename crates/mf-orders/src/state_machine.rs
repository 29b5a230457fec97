//! Order state machine
//!
//! The single source of truth for order lifecycle moves:
//!
//! | From           | To             | Guard                                             | Side effect              |
//! |----------------|----------------|---------------------------------------------------|--------------------------|
//! | DRAFT          | SCHEDULED      | scheduled date not in the past                    | set scheduled_at         |
//! | SCHEDULED      | ASSIGNED       | technician provided (activity checked upstream)   | bind technician          |
//! | ASSIGNED       | IN_PROGRESS    | caller matches bound technician                   | set started_at           |
//! | IN_PROGRESS    | AWAITING_PARTS | parts-shortage flag raised                        | set parts_shortage       |
//! | AWAITING_PARTS | IN_PROGRESS    | parts available confirmation                      | clear parts_shortage     |
//! | IN_PROGRESS    | EXECUTED       | all assets COMPLETED, mandatory activities done   | set finished_at          |
//! | EXECUTED       | APPROVED       | approver provided, approver != technician         | set approved_at/by       |
//! | any non-terminal | CANCELLED    | non-empty cancellation reason                     | set cancelled_at, reason |
//!
//! Any pair outside the table fails with `InvalidTransition` naming (from,
//! to) and leaves the order untouched. Guard evaluation is pure and
//! synchronous; collaborator checks (technician activity, stock) happen in
//! the orchestrator before the machine is invoked.

use chrono::{DateTime, Utc};
use mf_core::error::{MfError, ValidationErrors};
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::activity_plan::ActivityPlanItem;
use mf_models::order::{OrderState, ServiceOrder};
use mf_models::order_asset::OrderAsset;

/// A requested lifecycle move with its guard inputs
#[derive(Debug, Clone)]
pub enum Transition {
    Schedule { scheduled_at: DateTime<Utc> },
    Assign { technician_id: Id },
    Start { technician_id: Id },
    ReportPartsShortage,
    Resume { parts_available: bool },
    Finish,
    Approve { approver_id: Id },
    Cancel { reason: String },
}

impl Transition {
    /// The state this transition moves to
    pub fn target(&self) -> OrderState {
        match self {
            Self::Schedule { .. } => OrderState::Scheduled,
            Self::Assign { .. } => OrderState::Assigned,
            Self::Start { .. } => OrderState::InProgress,
            Self::ReportPartsShortage => OrderState::AwaitingParts,
            Self::Resume { .. } => OrderState::InProgress,
            Self::Finish => OrderState::Executed,
            Self::Approve { .. } => OrderState::Approved,
            Self::Cancel { .. } => OrderState::Cancelled,
        }
    }

    /// States this transition may be applied from
    fn sources(&self) -> &'static [OrderState] {
        match self {
            Self::Schedule { .. } => &[OrderState::Draft],
            Self::Assign { .. } => &[OrderState::Scheduled],
            Self::Start { .. } => &[OrderState::Assigned],
            Self::ReportPartsShortage => &[OrderState::InProgress],
            Self::Resume { .. } => &[OrderState::AwaitingParts],
            Self::Finish => &[OrderState::InProgress],
            Self::Approve { .. } => &[OrderState::Executed],
            Self::Cancel { .. } => &[
                OrderState::Draft,
                OrderState::Scheduled,
                OrderState::Assigned,
                OrderState::InProgress,
                OrderState::AwaitingParts,
                OrderState::Executed,
            ],
        }
    }
}

/// What a successful transition changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: OrderState,
    pub to: OrderState,
}

/// The authoritative lifecycle controller
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Whether (from, to) is a pair in the transition table at all.
    pub fn allowed(from: OrderState, to: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (from, to),
            (Draft, Scheduled)
                | (Scheduled, Assigned)
                | (Assigned, InProgress)
                | (InProgress, AwaitingParts)
                | (AwaitingParts, InProgress)
                | (InProgress, Executed)
                | (Executed, Approved)
        ) || (to == Cancelled && !from.is_terminal())
    }

    /// Validate the transition against the order's current state and apply
    /// its side effects. On any error the order is left unchanged.
    pub fn apply(
        &self,
        order: &mut ServiceOrder,
        assets: &[OrderAsset],
        plan: &[ActivityPlanItem],
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> MfResult<TransitionOutcome> {
        let from = order.state;
        let to = transition.target();

        if !transition.sources().contains(&from) {
            return Err(MfError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }

        match transition {
            Transition::Schedule { scheduled_at } => {
                if scheduled_at.date_naive() < now.date_naive() {
                    return Err(ValidationErrors::single(
                        "scheduled_at",
                        "scheduled date must not be in the past",
                    )
                    .into());
                }
                order.scheduled_at = Some(*scheduled_at);
            }
            Transition::Assign { technician_id } => {
                order.technician_id = Some(*technician_id);
            }
            Transition::Start { technician_id } => {
                if order.technician_id != Some(*technician_id) {
                    return Err(ValidationErrors::single(
                        "technician_id",
                        "does not match the assigned technician",
                    )
                    .into());
                }
                order.started_at = Some(now);
            }
            Transition::ReportPartsShortage => {
                order.parts_shortage = true;
            }
            Transition::Resume { parts_available } => {
                if !parts_available {
                    return Err(ValidationErrors::single(
                        "parts_available",
                        "parts availability must be confirmed to resume",
                    )
                    .into());
                }
                order.parts_shortage = false;
            }
            Transition::Finish => {
                // The cross-entity guard: the order cannot finish while any
                // attached asset or mandatory checklist step is open.
                if !assets.iter().all(|a| a.is_completed()) {
                    return Err(MfError::InvalidTransition {
                        from: from.as_str(),
                        to: to.as_str(),
                    });
                }
                if !plan.iter().filter(|i| i.mandatory).all(|i| i.executed) {
                    return Err(MfError::InvalidTransition {
                        from: from.as_str(),
                        to: to.as_str(),
                    });
                }
                order.finished_at = Some(now);
            }
            Transition::Approve { approver_id } => {
                if order.technician_id == Some(*approver_id) {
                    return Err(ValidationErrors::single(
                        "approver_id",
                        "approver must differ from the executing technician",
                    )
                    .into());
                }
                order.approved_by_id = Some(*approver_id);
                order.approved_at = Some(now);
            }
            Transition::Cancel { reason } => {
                if reason.trim().is_empty() {
                    return Err(
                        ValidationErrors::single("reason", "can't be blank").into()
                    );
                }
                order.cancellation_reason = Some(reason.trim().to_string());
                order.cancelled_at = Some(now);
            }
        }

        order.state = to;
        order.updated_at = now;
        tracing::info!(
            order_code = %order.code,
            from = %from,
            to = %to,
            "order transitioned"
        );
        Ok(TransitionOutcome { from, to })
    }
}
