//! Order orchestrator
//!
//! The only entry point external callers use. Each operation is a single
//! logical transaction: validate inputs, invoke the state machine, update
//! dependent components, commit atomically, then emit a notification event.
//! Notifications never fire for a transition that was rolled back.
//!
//! Concurrent mutations of the same order are serialized through the store's
//! optimistic lock: a lost race surfaces as `Conflict` and is retried with a
//! reload a bounded number of times, so guards are always evaluated against
//! the freshest committed state.

use std::sync::Arc;

use chrono::Utc;
use mf_core::config::OrchestratorConfig;
use mf_core::error::{MfError, ValidationErrors};
use mf_core::result::MfResult;
use mf_core::traits::{Actor, ActorContext, Directory, Id, StockLedger};
use mf_db::store::{OrderAggregate, OrderStore};
use mf_journals::TrailRecorder;
use mf_models::order::{OrderState, ServiceOrder};
use mf_models::sequence::DocumentType;
use mf_notifications::{NotificationSender, OrderEvent, OrderEventKind};
use mf_plans::{PlanResolver, ResolvedPlan};
use mf_sequences::SequenceGenerator;

use crate::asset_ledger::AssetLedger;
use crate::commands::*;
use crate::state_machine::{OrderStateMachine, Transition};

pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    directory: Arc<dyn Directory>,
    stock: Arc<dyn StockLedger>,
    resolver: PlanResolver,
    sequences: SequenceGenerator,
    notifier: Arc<dyn NotificationSender>,
    machine: OrderStateMachine,
    ledger: AssetLedger,
    recorder: TrailRecorder,
    config: OrchestratorConfig,
}

impl OrderOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OrderStore>,
        directory: Arc<dyn Directory>,
        stock: Arc<dyn StockLedger>,
        resolver: PlanResolver,
        sequences: SequenceGenerator,
        notifier: Arc<dyn NotificationSender>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            directory,
            stock,
            resolver,
            sequences,
            notifier,
            machine: OrderStateMachine,
            ledger: AssetLedger,
            recorder: TrailRecorder,
            config,
        }
    }

    /// Create an order in DRAFT with its assets and checklist.
    ///
    /// Plan resolution happens first, using the asset types supplied; assets
    /// are attached afterwards against the resolved type.
    pub async fn create_order(
        &self,
        actor: Actor,
        command: CreateOrderCommand,
    ) -> MfResult<OrderAggregate> {
        command.validate_shape()?;

        let client = self.directory.get_client(command.client_id).await?;
        if !client.active {
            return Err(ValidationErrors::single("client_id", "client is not active").into());
        }

        let asset_types: Vec<Id> = command.assets.iter().map(|a| a.asset_type_id).collect();
        let resolved_type = mf_plans::resolver::homogeneous_asset_type(&asset_types)?;

        let plan = match &command.manual_plan {
            Some(manual) => self.resolver.manual_plan(manual)?,
            None => match self
                .resolver
                .resolve_plan(command.service_type_id, &asset_types)
                .await?
            {
                ResolvedPlan::Catalog(items) => items,
                ResolvedPlan::Empty if command.allow_empty_plan => Vec::new(),
                ResolvedPlan::Empty => {
                    return Err(ValidationErrors::single(
                        "activities",
                        "the catalog has no activities for this service and asset type; \
                         supply a manual plan or allow an empty one",
                    )
                    .into());
                }
            },
        };

        let assets = self.ledger.attach_assets(&command.assets, resolved_type)?;

        let now = Utc::now();
        let code = self
            .sequences
            .next_code(DocumentType::ServiceOrder, now)
            .await?;

        // The legacy primary asset field is a derived pointer to the first
        // attached asset, kept populated for single-asset consumers.
        let mut order = ServiceOrder::new(
            code,
            command.service_type_id,
            command.client_id,
            assets[0].asset_id,
            now,
        );
        if let Some(priority) = command.priority {
            order = order.with_priority(priority);
        }
        if let Some(description) = command.description {
            order = order.with_description(description);
        }

        let aggregate = OrderAggregate {
            history: vec![self.recorder.creation(order.state, actor.actor_id(), now)],
            order,
            assets,
            plan,
        };

        let saved = self.store.insert(aggregate).await?;
        tracing::info!(order_code = %saved.order.code, "order created");
        self.emit(
            &saved,
            OrderEventKind::Created,
            serde_json::json!({ "assets": saved.assets.len(), "activities": saved.plan.len() }),
        )
        .await;
        Ok(saved)
    }

    pub async fn schedule(
        &self,
        actor: Actor,
        command: ScheduleCommand,
    ) -> MfResult<OrderAggregate> {
        self.transition(
            actor,
            command.order_id,
            &Transition::Schedule {
                scheduled_at: command.scheduled_at,
            },
            None,
            OrderEventKind::Scheduled,
        )
        .await
    }

    pub async fn assign_technician(
        &self,
        actor: Actor,
        command: AssignTechnicianCommand,
    ) -> MfResult<OrderAggregate> {
        if !self
            .directory
            .is_active_technician(command.technician_id)
            .await?
        {
            return Err(ValidationErrors::single(
                "technician_id",
                "is not an active technician",
            )
            .into());
        }
        self.transition(
            actor,
            command.order_id,
            &Transition::Assign {
                technician_id: command.technician_id,
            },
            None,
            OrderEventKind::TechnicianAssigned,
        )
        .await
    }

    pub async fn start(&self, actor: Actor, command: StartCommand) -> MfResult<OrderAggregate> {
        self.transition(
            actor,
            command.order_id,
            &Transition::Start {
                technician_id: command.technician_id,
            },
            None,
            OrderEventKind::Started,
        )
        .await
    }

    /// Report a parts shortage, parking the order in AWAITING_PARTS.
    ///
    /// When the missing component is known, a replacement reservation is
    /// attempted against the stock ledger once the transition guard has
    /// passed; its refusal is a business error surfaced to the caller and
    /// the order stays IN_PROGRESS. A report the state machine rejects
    /// touches the ledger not at all.
    pub async fn report_parts_shortage(
        &self,
        actor: Actor,
        command: PartsShortageCommand,
    ) -> MfResult<OrderAggregate> {
        let note = command.note.clone().or_else(|| {
            command
                .component_id
                .map(|c| format!("awaiting delivery of component {}", c))
        });
        let mut attempt = 0;
        let mut reserved = false;
        loop {
            let mut aggregate = self.store.load(command.order_id).await?;
            let now = Utc::now();
            {
                let OrderAggregate {
                    order,
                    assets,
                    plan,
                    history,
                } = &mut aggregate;
                let outcome = self.machine.apply(
                    order,
                    assets.as_slice(),
                    plan.as_slice(),
                    &Transition::ReportPartsShortage,
                    now,
                )?;

                if let Some(component_id) = command.component_id {
                    if !reserved {
                        self.stock.reserve_or_consume(component_id, 1.0).await?;
                        reserved = true;
                    }
                }

                history.push(self.recorder.append(
                    outcome.from,
                    outcome.to,
                    actor.actor_id(),
                    now,
                    note.clone(),
                ));
            }

            match self.commit_with_retry_check(aggregate, &mut attempt).await? {
                Some(saved) => {
                    self.emit(
                        &saved,
                        OrderEventKind::PartsShortageReported,
                        serde_json::json!({ "componentId": command.component_id }),
                    )
                    .await;
                    return Ok(saved);
                }
                None => continue,
            }
        }
    }

    pub async fn resume(&self, actor: Actor, command: ResumeCommand) -> MfResult<OrderAggregate> {
        self.transition(
            actor,
            command.order_id,
            &Transition::Resume {
                parts_available: command.parts_available,
            },
            None,
            OrderEventKind::Resumed,
        )
        .await
    }

    /// Advance one asset's sub-state (PENDING -> IN_PROGRESS -> COMPLETED).
    ///
    /// The parent order's state is untouched; the change lands on the
    /// order's audit trail as a note.
    pub async fn advance_asset(
        &self,
        actor: Actor,
        command: AdvanceAssetCommand,
    ) -> MfResult<OrderAggregate> {
        let mut attempt = 0;
        loop {
            let mut aggregate = self.store.load(command.order_id).await?;
            if aggregate.order.state.is_terminal() {
                return Err(ValidationErrors::single(
                    "order_id",
                    format!("order is closed ({})", aggregate.order.state),
                )
                .into());
            }

            let now = Utc::now();
            let order_state = aggregate.order.state;
            let asset = aggregate.asset_mut(command.asset_id).ok_or_else(|| {
                MfError::not_found("OrderAsset", "asset_id", command.asset_id)
            })?;
            let advance = self.ledger.advance(asset, command.to, now)?;
            let entry = self.recorder.asset_advanced(
                order_state,
                asset,
                advance.from,
                advance.to,
                actor.actor_id(),
                now,
            );
            aggregate.history.push(entry);

            match self.commit_with_retry_check(aggregate, &mut attempt).await? {
                Some(saved) => {
                    self.emit(
                        &saved,
                        OrderEventKind::AssetAdvanced,
                        serde_json::json!({
                            "assetId": command.asset_id,
                            "progress": command.to,
                        }),
                    )
                    .await;
                    return Ok(saved);
                }
                None => continue,
            }
        }
    }

    /// Mark one checklist activity as executed.
    pub async fn complete_activity(
        &self,
        actor: Actor,
        command: CompleteActivityCommand,
    ) -> MfResult<OrderAggregate> {
        let mut attempt = 0;
        loop {
            let mut aggregate = self.store.load(command.order_id).await?;
            if aggregate.order.state != OrderState::InProgress {
                return Err(ValidationErrors::single(
                    "order_id",
                    format!(
                        "activities can only be executed while the order is in progress \
                         (currently {})",
                        aggregate.order.state
                    ),
                )
                .into());
            }

            let now = Utc::now();
            let order_state = aggregate.order.state;
            let item = aggregate.plan_item_mut(command.activity_id).ok_or_else(|| {
                MfError::not_found("ActivityPlanItem", "activity_id", command.activity_id)
            })?;
            if item.executed {
                return Err(ValidationErrors::single(
                    "activity_id",
                    "activity is already executed",
                )
                .into());
            }
            item.executed = true;
            item.executed_at = Some(now);
            let (activity_id, sequence) = (item.activity_id, item.sequence);
            let entry = self.recorder.activity_executed(
                order_state,
                activity_id,
                sequence,
                actor.actor_id(),
                now,
            );
            aggregate.history.push(entry);

            match self.commit_with_retry_check(aggregate, &mut attempt).await? {
                Some(saved) => {
                    self.emit(
                        &saved,
                        OrderEventKind::ActivityCompleted,
                        serde_json::json!({ "activityId": command.activity_id }),
                    )
                    .await;
                    return Ok(saved);
                }
                None => continue,
            }
        }
    }

    /// Close the execution phase. All attached assets must be COMPLETED and
    /// all mandatory activities executed; tracked parts consumed by executed
    /// activities are charged against the stock ledger before the transition
    /// commits.
    pub async fn finish(&self, actor: Actor, command: FinishCommand) -> MfResult<OrderAggregate> {
        let mut attempt = 0;
        let mut parts_charged = false;
        loop {
            let mut aggregate = self.store.load(command.order_id).await?;
            let now = Utc::now();
            {
                let OrderAggregate {
                    order,
                    assets,
                    plan,
                    history,
                } = &mut aggregate;
                let outcome =
                    self.machine
                        .apply(order, assets.as_slice(), plan.as_slice(), &Transition::Finish, now)?;

                // Charged at most once across retry attempts. A commit that
                // fails permanently after the charge is not compensated, so
                // stock consumption is at-least-once and reconciled
                // downstream.
                if !parts_charged {
                    for item in plan.iter().filter(|i| i.executed && i.consumes_part()) {
                        let component_id = item.component_id.unwrap_or_default();
                        self.stock
                            .reserve_or_consume(component_id, item.component_qty.unwrap_or(1.0))
                            .await?;
                    }
                    parts_charged = true;
                }

                history.push(self.recorder.append(
                    outcome.from,
                    outcome.to,
                    actor.actor_id(),
                    now,
                    None,
                ));
            }

            match self.commit_with_retry_check(aggregate, &mut attempt).await? {
                Some(saved) => {
                    self.emit(
                        &saved,
                        OrderEventKind::Finished,
                        serde_json::json!({ "finishedAt": saved.order.finished_at }),
                    )
                    .await;
                    return Ok(saved);
                }
                None => continue,
            }
        }
    }

    pub async fn approve(&self, actor: Actor, command: ApproveCommand) -> MfResult<OrderAggregate> {
        self.transition(
            actor,
            command.order_id,
            &Transition::Approve {
                approver_id: command.approver_id,
            },
            None,
            OrderEventKind::Approved,
        )
        .await
    }

    pub async fn cancel(&self, actor: Actor, command: CancelCommand) -> MfResult<OrderAggregate> {
        command.validate_shape()?;
        self.transition(
            actor,
            command.order_id,
            &Transition::Cancel {
                reason: command.reason.clone(),
            },
            None,
            OrderEventKind::Cancelled,
        )
        .await
    }

    /// Shared load-apply-commit loop for plain state transitions.
    async fn transition(
        &self,
        actor: Actor,
        order_id: Id,
        transition: &Transition,
        note: Option<String>,
        kind: OrderEventKind,
    ) -> MfResult<OrderAggregate> {
        let mut attempt = 0;
        loop {
            let mut aggregate = self.store.load(order_id).await?;
            let now = Utc::now();
            {
                let OrderAggregate {
                    order,
                    assets,
                    plan,
                    history,
                } = &mut aggregate;
                let outcome = self.machine.apply(
                    order,
                    assets.as_slice(),
                    plan.as_slice(),
                    transition,
                    now,
                )?;
                history.push(self.recorder.append(
                    outcome.from,
                    outcome.to,
                    actor.actor_id(),
                    now,
                    note.clone(),
                ));
            }

            match self.commit_with_retry_check(aggregate, &mut attempt).await? {
                Some(saved) => {
                    self.emit(
                        &saved,
                        kind,
                        serde_json::json!({ "state": saved.order.state }),
                    )
                    .await;
                    return Ok(saved);
                }
                None => continue,
            }
        }
    }

    /// Commit, translating a retryable conflict into `Ok(None)` while the
    /// retry budget lasts.
    async fn commit_with_retry_check(
        &self,
        aggregate: OrderAggregate,
        attempt: &mut u32,
    ) -> MfResult<Option<OrderAggregate>> {
        let code = aggregate.order.code.clone();
        match self.store.commit(aggregate).await {
            Ok(saved) => Ok(Some(saved)),
            Err(e) if e.is_retryable() && *attempt < self.config.max_conflict_retries => {
                *attempt += 1;
                tracing::debug!(
                    order_code = %code,
                    attempt = *attempt,
                    "commit conflicted; reloading and retrying"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Post-commit, fire-and-forget. Delivery failure is logged and left to
    /// the notification collaborator's own retry; it never fails the
    /// already-committed transition.
    async fn emit(&self, aggregate: &OrderAggregate, kind: OrderEventKind, payload: serde_json::Value) {
        let event = OrderEvent::new(
            aggregate.order.id.unwrap_or_default(),
            &aggregate.order.code,
            kind,
            payload,
        );
        if let Err(e) = self.notifier.notify(event).await {
            tracing::warn!(
                order_code = %aggregate.order.code,
                error = %e,
                "notification delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use mf_core::traits::{Client, MockDirectory};
    use mf_db::{MemoryCounterStore, MemoryOrderStore};
    use mf_journals::Trail;
    use mf_models::activity_plan::{ActivityDefinition, PlanOrigin};
    use mf_models::order_asset::AssetProgress;
    use mf_notifications::MemorySender;
    use mf_plans::{ActivityCatalog, ManualPlanItem};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::asset_ledger::AssetSpec;

    const TECHNICIAN: Id = 77;
    const OTHER_TECHNICIAN: Id = 78;
    const CLIENT: Id = 200;
    const INACTIVE_CLIENT: Id = 201;
    const FILTER_COMPONENT: Id = 900;

    fn dispatcher() -> Actor {
        Actor::dispatcher(1)
    }

    fn technician() -> Actor {
        Actor::technician(TECHNICIAN)
    }

    fn approver() -> Actor {
        Actor::dispatcher(2)
    }

    struct StaticDirectory {
        technicians: HashSet<Id>,
    }

    impl StaticDirectory {
        fn new() -> Self {
            Self {
                technicians: [TECHNICIAN, OTHER_TECHNICIAN].into_iter().collect(),
            }
        }
    }

    #[async_trait]
    impl Directory for StaticDirectory {
        async fn is_active_technician(&self, id: Id) -> MfResult<bool> {
            Ok(self.technicians.contains(&id))
        }

        async fn get_client(&self, id: Id) -> MfResult<Client> {
            Ok(Client {
                id,
                name: format!("Client {}", id),
                active: id != INACTIVE_CLIENT,
            })
        }
    }

    struct RecordingStock {
        reject: bool,
        calls: Mutex<Vec<(Id, f64)>>,
    }

    impl RecordingStock {
        fn new() -> Self {
            Self {
                reject: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                reject: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Id, f64)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl StockLedger for RecordingStock {
        async fn reserve_or_consume(&self, component_id: Id, qty: f64) -> MfResult<()> {
            if self.reject {
                return Err(MfError::dependency("stock", "insufficient stock"));
            }
            self.calls.lock().push((component_id, qty));
            Ok(())
        }
    }

    struct FixedCatalog {
        definitions: Vec<ActivityDefinition>,
    }

    #[async_trait]
    impl ActivityCatalog for FixedCatalog {
        async fn activities_for(
            &self,
            _service_type_id: Id,
            _asset_type_id: Id,
        ) -> MfResult<Vec<ActivityDefinition>> {
            Ok(self.definitions.clone())
        }
    }

    /// Store wrapper that fails the next N commits with a conflict
    struct ConflictingStore {
        inner: MemoryOrderStore,
        remaining_conflicts: AtomicU32,
    }

    impl ConflictingStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryOrderStore::new(),
                remaining_conflicts: AtomicU32::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl OrderStore for ConflictingStore {
        async fn insert(&self, aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
            self.inner.insert(aggregate).await
        }

        async fn load(&self, order_id: Id) -> MfResult<OrderAggregate> {
            self.inner.load(order_id).await
        }

        async fn load_by_code(&self, code: &str) -> MfResult<OrderAggregate> {
            self.inner.load_by_code(code).await
        }

        async fn commit(&self, aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
            let remaining = self.remaining_conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(MfError::conflict("injected conflict"));
            }
            self.inner.commit(aggregate).await
        }
    }

    fn catalog_definitions() -> Vec<ActivityDefinition> {
        vec![
            ActivityDefinition {
                id: 100,
                name: "Inspect unit".into(),
                execution_order: 1,
                mandatory: true,
                component_id: None,
                component_qty: None,
            },
            ActivityDefinition {
                id: 101,
                name: "Replace filter".into(),
                execution_order: 2,
                mandatory: true,
                component_id: Some(FILTER_COMPONENT),
                component_qty: Some(2.0),
            },
            ActivityDefinition {
                id: 102,
                name: "Clean housing".into(),
                execution_order: 3,
                mandatory: false,
                component_id: None,
                component_qty: None,
            },
        ]
    }

    struct Fixture {
        store: Arc<dyn OrderStore>,
        sender: Arc<MemorySender>,
        stock: Arc<RecordingStock>,
        orchestrator: OrderOrchestrator,
    }

    fn fixture() -> Fixture {
        build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::new()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        )
    }

    fn build_fixture(
        store: Arc<dyn OrderStore>,
        sender: Arc<MemorySender>,
        stock: Arc<RecordingStock>,
        directory: Arc<dyn Directory>,
        definitions: Vec<ActivityDefinition>,
    ) -> Fixture {
        let orchestrator = OrderOrchestrator::new(
            Arc::clone(&store),
            directory,
            stock.clone() as Arc<dyn StockLedger>,
            PlanResolver::new(Arc::new(FixedCatalog { definitions })),
            SequenceGenerator::new(Arc::new(MemoryCounterStore::new())),
            sender.clone() as Arc<dyn NotificationSender>,
            OrchestratorConfig::default(),
        );
        Fixture {
            store,
            sender,
            stock,
            orchestrator,
        }
    }

    fn asset_spec(asset_id: Id, asset_type_id: Id) -> AssetSpec {
        AssetSpec {
            asset_id,
            asset_type_id,
            label: format!("Asset {}", asset_id),
        }
    }

    fn create_command(assets: Vec<AssetSpec>) -> CreateOrderCommand {
        CreateOrderCommand {
            client_id: CLIENT,
            service_type_id: 1,
            priority: None,
            description: Some("quarterly maintenance".into()),
            assets,
            manual_plan: None,
            allow_empty_plan: false,
        }
    }

    fn three_asset_command() -> CreateOrderCommand {
        create_command(vec![asset_spec(10, 5), asset_spec(11, 5), asset_spec(12, 5)])
    }

    /// Drive a freshly created order to IN_PROGRESS.
    async fn start_order(fx: &Fixture, command: CreateOrderCommand) -> Id {
        let created = fx.orchestrator.create_order(dispatcher(), command).await.unwrap();
        let order_id = created.order.id.unwrap();
        fx.orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id,
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();
        fx.orchestrator
            .assign_technician(
                dispatcher(),
                AssignTechnicianCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap();
        fx.orchestrator
            .start(
                technician(),
                StartCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap();
        order_id
    }

    async fn complete_asset(fx: &Fixture, order_id: Id, asset_id: Id) {
        for to in [AssetProgress::InProgress, AssetProgress::Completed] {
            fx.orchestrator
                .advance_asset(
                    technician(),
                    AdvanceAssetCommand {
                        order_id,
                        asset_id,
                        to,
                    },
                )
                .await
                .unwrap();
        }
    }

    async fn execute_mandatory_activities(fx: &Fixture, order_id: Id) {
        let aggregate = fx.store.load(order_id).await.unwrap();
        for item in aggregate.plan.iter().filter(|i| i.mandatory) {
            fx.orchestrator
                .complete_activity(
                    technician(),
                    CompleteActivityCommand {
                        order_id,
                        activity_id: item.activity_id,
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_order_resolves_plan_attaches_assets_and_notifies() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();

        assert_eq!(created.order.state, OrderState::Draft);
        assert!(created.order.code.starts_with("SO-"));
        assert!(created.order.code.ends_with("-0001"));
        assert_eq!(created.order.primary_asset_id, 10);
        assert_eq!(
            created.assets.iter().map(|a| a.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            created.plan.iter().map(|i| i.activity_id).collect::<Vec<_>>(),
            vec![100, 101, 102]
        );
        assert_eq!(created.history.len(), 1);
        assert!(created.history[0].is_initial());
        assert_eq!(
            fx.sender.kinds().await,
            vec![OrderEventKind::Created]
        );
    }

    #[tokio::test]
    async fn create_order_rejects_inactive_clients_and_mixed_asset_types() {
        let fx = fixture();

        let mut command = three_asset_command();
        command.client_id = INACTIVE_CLIENT;
        let err = fx
            .orchestrator
            .create_order(dispatcher(), command)
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let mixed = create_command(vec![asset_spec(10, 5), asset_spec(11, 9)]);
        let err = fx
            .orchestrator
            .create_order(dispatcher(), mixed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("asset type 9"), "got: {}", err);

        assert!(fx.sender.events().await.is_empty());
    }

    #[tokio::test]
    async fn empty_catalog_blocks_creation_unless_allowed_or_overridden() {
        let fx = build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::new()),
            Arc::new(StaticDirectory::new()),
            vec![],
        );

        let err = fx
            .orchestrator
            .create_order(dispatcher(), create_command(vec![asset_spec(10, 5)]))
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let mut allowed = create_command(vec![asset_spec(10, 5)]);
        allowed.allow_empty_plan = true;
        let created = fx
            .orchestrator
            .create_order(dispatcher(), allowed)
            .await
            .unwrap();
        assert!(created.plan.is_empty());

        let mut manual = create_command(vec![asset_spec(11, 5)]);
        manual.manual_plan = Some(vec![
            ManualPlanItem {
                activity_id: 42,
                mandatory: true,
            },
            ManualPlanItem {
                activity_id: 7,
                mandatory: false,
            },
        ]);
        let created = fx
            .orchestrator
            .create_order(dispatcher(), manual)
            .await
            .unwrap();
        assert_eq!(created.plan.len(), 2);
        assert!(created.plan.iter().all(|i| i.origin == PlanOrigin::Manual));
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_approval_with_a_consistent_trail() {
        let fx = fixture();
        let order_id = start_order(&fx, three_asset_command()).await;

        for asset_id in [10, 11, 12] {
            complete_asset(&fx, order_id, asset_id).await;
        }
        execute_mandatory_activities(&fx, order_id).await;

        let finished = fx
            .orchestrator
            .finish(technician(), FinishCommand { order_id })
            .await
            .unwrap();
        assert_eq!(finished.order.state, OrderState::Executed);
        assert!(finished.order.finished_at.is_some());
        assert_eq!(fx.stock.calls(), vec![(FILTER_COMPONENT, 2.0)]);

        let approved = fx
            .orchestrator
            .approve(
                approver(),
                ApproveCommand {
                    order_id,
                    approver_id: approver().id,
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.order.state, OrderState::Approved);
        assert_eq!(approved.order.approved_by_id, Some(approver().id));

        let trail = Trail::new(&approved.history);
        trail.verify_consistent_with(OrderState::Approved).unwrap();
        // creation, schedule, assign, start, finish, approve
        assert_eq!(trail.transitions().count(), 6);

        let kinds = fx.sender.kinds().await;
        assert_eq!(kinds.first(), Some(&OrderEventKind::Created));
        assert_eq!(
            &kinds[kinds.len() - 2..],
            &[OrderEventKind::Finished, OrderEventKind::Approved]
        );
    }

    #[tokio::test]
    async fn finish_requires_every_asset_completed() {
        let fx = fixture();
        let order_id = start_order(&fx, three_asset_command()).await;

        complete_asset(&fx, order_id, 10).await;
        complete_asset(&fx, order_id, 11).await;
        execute_mandatory_activities(&fx, order_id).await;

        let err = fx
            .orchestrator
            .finish(technician(), FinishCommand { order_id })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MfError::InvalidTransition {
                from: "IN_PROGRESS",
                to: "EXECUTED"
            }
        ));

        let reloaded = fx.store.load(order_id).await.unwrap();
        assert_eq!(reloaded.order.state, OrderState::InProgress);
        assert!(reloaded.order.finished_at.is_none());
        assert!(!fx.sender.kinds().await.contains(&OrderEventKind::Finished));

        // Nothing was charged against stock for the rejected attempt.
        assert!(fx.stock.calls().is_empty());

        complete_asset(&fx, order_id, 12).await;
        fx.orchestrator
            .finish(technician(), FinishCommand { order_id })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn assign_rejects_technicians_the_directory_does_not_vouch_for() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();
        fx.orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id,
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .assign_technician(
                dispatcher(),
                AssignTechnicianCommand {
                    order_id,
                    technician_id: 500,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let reloaded = fx.store.load(order_id).await.unwrap();
        assert_eq!(reloaded.order.state, OrderState::Scheduled);
        assert!(reloaded.order.technician_id.is_none());
        assert!(!fx
            .sender
            .kinds()
            .await
            .contains(&OrderEventKind::TechnicianAssigned));
    }

    #[tokio::test]
    async fn directory_outage_surfaces_as_a_dependency_error() {
        let mut directory = MockDirectory::new();
        directory
            .expect_is_active_technician()
            .returning(|_| Err(MfError::dependency("directory", "timed out")));
        directory.expect_get_client().returning(|id| {
            Ok(Client {
                id,
                name: "Client".into(),
                active: true,
            })
        });

        let fx = build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::new()),
            Arc::new(directory),
            catalog_definitions(),
        );

        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();
        fx.orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id,
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .assign_technician(
                dispatcher(),
                AssignTechnicianCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Dependency { .. }));
    }

    #[tokio::test]
    async fn stock_refusal_aborts_finish_before_commit() {
        let fx = build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::rejecting()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        );
        let order_id = start_order(&fx, three_asset_command()).await;
        for asset_id in [10, 11, 12] {
            complete_asset(&fx, order_id, asset_id).await;
        }
        execute_mandatory_activities(&fx, order_id).await;

        let err = fx
            .orchestrator
            .finish(technician(), FinishCommand { order_id })
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Dependency { .. }));

        let reloaded = fx.store.load(order_id).await.unwrap();
        assert_eq!(reloaded.order.state, OrderState::InProgress);
        assert!(!fx.sender.kinds().await.contains(&OrderEventKind::Finished));
    }

    #[tokio::test]
    async fn conflicts_are_retried_with_a_reload_until_the_budget_runs_out() {
        let within_budget = build_fixture(
            Arc::new(ConflictingStore::new(2)),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::new()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        );
        let created = within_budget
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let scheduled = within_budget
            .orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id: created.order.id.unwrap(),
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(scheduled.order.state, OrderState::Scheduled);
        // Only the surviving attempt emits an event.
        assert_eq!(
            within_budget.sender.kinds().await,
            vec![OrderEventKind::Created, OrderEventKind::Scheduled]
        );

        let over_budget = build_fixture(
            Arc::new(ConflictingStore::new(10)),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::new()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        );
        let created = over_budget
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let err = over_budget
            .orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id: created.order.id.unwrap(),
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Conflict { .. }));
        assert_eq!(
            over_budget.sender.kinds().await,
            vec![OrderEventKind::Created]
        );
    }

    #[tokio::test]
    async fn notification_failure_never_fails_the_operation() {
        let fx = build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::failing()),
            Arc::new(RecordingStock::new()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        );

        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let scheduled = fx
            .orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id: created.order.id.unwrap(),
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(scheduled.order.state, OrderState::Scheduled);
    }

    #[tokio::test]
    async fn cancel_needs_a_reason_and_is_single_shot() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();

        let err = fx
            .orchestrator
            .cancel(
                dispatcher(),
                CancelCommand {
                    order_id,
                    reason: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let cancelled = fx
            .orchestrator
            .cancel(
                dispatcher(),
                CancelCommand {
                    order_id,
                    reason: "client withdrew the request".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.order.state, OrderState::Cancelled);
        assert_eq!(
            cancelled.order.cancellation_reason.as_deref(),
            Some("client withdrew the request")
        );

        let err = fx
            .orchestrator
            .cancel(
                dispatcher(),
                CancelCommand {
                    order_id,
                    reason: "again".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::InvalidTransition { .. }));

        let kinds = fx.sender.kinds().await;
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == OrderEventKind::Cancelled)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn asset_advances_land_on_the_trail_and_stop_once_the_order_closes() {
        let fx = fixture();
        let order_id = start_order(&fx, three_asset_command()).await;

        let advanced = fx
            .orchestrator
            .advance_asset(
                technician(),
                AdvanceAssetCommand {
                    order_id,
                    asset_id: 10,
                    to: AssetProgress::InProgress,
                },
            )
            .await
            .unwrap();
        let latest = advanced.history.last().unwrap();
        assert_eq!(latest.from_state, Some(OrderState::InProgress));
        assert_eq!(latest.to_state, OrderState::InProgress);
        assert!(latest.note.as_deref().unwrap_or("").contains("asset 10"));
        Trail::new(&advanced.history)
            .verify_consistent_with(OrderState::InProgress)
            .unwrap();

        // Skipping a sub-state is rejected.
        let err = fx
            .orchestrator
            .advance_asset(
                technician(),
                AdvanceAssetCommand {
                    order_id,
                    asset_id: 11,
                    to: AssetProgress::Completed,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::InvalidTransition { .. }));

        fx.orchestrator
            .cancel(
                dispatcher(),
                CancelCommand {
                    order_id,
                    reason: "equipment decommissioned".into(),
                },
            )
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .advance_asset(
                technician(),
                AdvanceAssetCommand {
                    order_id,
                    asset_id: 10,
                    to: AssetProgress::Completed,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));
    }

    #[tokio::test]
    async fn activities_execute_only_in_progress_and_only_once() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();

        let err = fx
            .orchestrator
            .complete_activity(
                technician(),
                CompleteActivityCommand {
                    order_id,
                    activity_id: 100,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        fx.orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id,
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();
        fx.orchestrator
            .assign_technician(
                dispatcher(),
                AssignTechnicianCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap();
        fx.orchestrator
            .start(
                technician(),
                StartCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .complete_activity(
                technician(),
                CompleteActivityCommand {
                    order_id,
                    activity_id: 9999,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::NotFound { .. }));

        let executed = fx
            .orchestrator
            .complete_activity(
                technician(),
                CompleteActivityCommand {
                    order_id,
                    activity_id: 100,
                },
            )
            .await
            .unwrap();
        let item = executed
            .plan
            .iter()
            .find(|i| i.activity_id == 100)
            .unwrap();
        assert!(item.executed);
        assert!(item.executed_at.is_some());

        let err = fx
            .orchestrator
            .complete_activity(
                technician(),
                CompleteActivityCommand {
                    order_id,
                    activity_id: 100,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));
    }

    #[tokio::test]
    async fn parts_shortage_parks_and_resume_returns_to_work() {
        let fx = fixture();
        let order_id = start_order(&fx, three_asset_command()).await;

        let parked = fx
            .orchestrator
            .report_parts_shortage(
                technician(),
                PartsShortageCommand {
                    order_id,
                    component_id: Some(FILTER_COMPONENT),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(parked.order.state, OrderState::AwaitingParts);
        assert!(parked.order.parts_shortage);
        assert_eq!(fx.stock.calls(), vec![(FILTER_COMPONENT, 1.0)]);
        let latest = parked.history.last().unwrap();
        assert!(latest
            .note
            .as_deref()
            .unwrap_or("")
            .contains(&FILTER_COMPONENT.to_string()));

        let err = fx
            .orchestrator
            .resume(
                technician(),
                ResumeCommand {
                    order_id,
                    parts_available: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let resumed = fx
            .orchestrator
            .resume(
                technician(),
                ResumeCommand {
                    order_id,
                    parts_available: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(resumed.order.state, OrderState::InProgress);
        assert!(!resumed.order.parts_shortage);
    }

    #[tokio::test]
    async fn rejected_shortage_reports_leave_stock_untouched() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();

        // Still in DRAFT: the transition guard rejects the report.
        let err = fx
            .orchestrator
            .report_parts_shortage(
                technician(),
                PartsShortageCommand {
                    order_id,
                    component_id: Some(FILTER_COMPONENT),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::InvalidTransition { .. }));
        assert!(fx.stock.calls().is_empty());

        // Unknown order: nothing to load, nothing reserved.
        let err = fx
            .orchestrator
            .report_parts_shortage(
                technician(),
                PartsShortageCommand {
                    order_id: 424242,
                    component_id: Some(FILTER_COMPONENT),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::NotFound { .. }));
        assert!(fx.stock.calls().is_empty());
    }

    #[tokio::test]
    async fn stock_refusal_leaves_a_shortage_report_uncommitted() {
        let fx = build_fixture(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemorySender::new()),
            Arc::new(RecordingStock::rejecting()),
            Arc::new(StaticDirectory::new()),
            catalog_definitions(),
        );
        let order_id = start_order(&fx, three_asset_command()).await;

        let err = fx
            .orchestrator
            .report_parts_shortage(
                technician(),
                PartsShortageCommand {
                    order_id,
                    component_id: Some(FILTER_COMPONENT),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Dependency { .. }));

        let reloaded = fx.store.load(order_id).await.unwrap();
        assert_eq!(reloaded.order.state, OrderState::InProgress);
        assert!(!reloaded.order.parts_shortage);
        assert!(!fx
            .sender
            .kinds()
            .await
            .contains(&OrderEventKind::PartsShortageReported));
    }

    #[tokio::test]
    async fn start_rejects_a_technician_other_than_the_assigned_one() {
        let fx = fixture();
        let created = fx
            .orchestrator
            .create_order(dispatcher(), three_asset_command())
            .await
            .unwrap();
        let order_id = created.order.id.unwrap();
        fx.orchestrator
            .schedule(
                dispatcher(),
                ScheduleCommand {
                    order_id,
                    scheduled_at: Utc::now() + Duration::days(1),
                },
            )
            .await
            .unwrap();
        fx.orchestrator
            .assign_technician(
                dispatcher(),
                AssignTechnicianCommand {
                    order_id,
                    technician_id: TECHNICIAN,
                },
            )
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .start(
                Actor::technician(OTHER_TECHNICIAN),
                StartCommand {
                    order_id,
                    technician_id: OTHER_TECHNICIAN,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfError::Validation(_)));

        let reloaded = fx.store.load(order_id).await.unwrap();
        assert_eq!(reloaded.order.state, OrderState::Assigned);
        assert!(reloaded.order.started_at.is_none());
    }
}
