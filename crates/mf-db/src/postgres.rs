//! PostgreSQL store
//!
//! Runtime-checked SQLx queries. A commit runs in one transaction: the order
//! row update carries the lock_version predicate, so a lost race shows up as
//! zero affected rows and nothing is written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mf_core::error::MfError;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::activity_plan::{ActivityPlanItem, PlanOrigin};
use mf_models::history::StateHistoryEntry;
use mf_models::order::{OrderState, Priority, ServiceOrder};
use mf_models::order_asset::{AssetProgress, OrderAsset};
use mf_models::sequence::DocumentType;
use mf_sequences::CounterStore;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::store::{OrderAggregate, OrderStore};

fn db_err(e: sqlx::Error) -> MfError {
    MfError::Database(e.to_string())
}

fn bad_row(what: &str, value: &str) -> MfError {
    MfError::Internal(format!("unexpected {} in database: {}", what, value))
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    code: String,
    state: String,
    priority: String,
    description: Option<String>,
    service_type_id: i64,
    client_id: i64,
    primary_asset_id: i64,
    technician_id: Option<i64>,
    approved_by_id: Option<i64>,
    parts_shortage: bool,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    lock_version: i32,
}

impl OrderRow {
    fn into_order(self) -> MfResult<ServiceOrder> {
        Ok(ServiceOrder {
            id: Some(self.id),
            state: OrderState::parse(&self.state)
                .ok_or_else(|| bad_row("order state", &self.state))?,
            priority: Priority::parse(&self.priority)
                .ok_or_else(|| bad_row("priority", &self.priority))?,
            code: self.code,
            description: self.description,
            service_type_id: self.service_type_id,
            client_id: self.client_id,
            primary_asset_id: self.primary_asset_id,
            technician_id: self.technician_id,
            approved_by_id: self.approved_by_id,
            parts_shortage: self.parts_shortage,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            approved_at: self.approved_at,
            cancelled_at: self.cancelled_at,
            lock_version: self.lock_version,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssetRow {
    id: i64,
    order_id: i64,
    asset_id: i64,
    position: i32,
    label: String,
    progress: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl AssetRow {
    fn into_asset(self) -> MfResult<OrderAsset> {
        Ok(OrderAsset {
            id: Some(self.id),
            order_id: Some(self.order_id),
            asset_id: self.asset_id,
            position: self.position,
            label: self.label,
            progress: AssetProgress::parse(&self.progress)
                .ok_or_else(|| bad_row("asset progress", &self.progress))?,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlanItemRow {
    id: i64,
    order_id: i64,
    activity_id: i64,
    sequence: i32,
    origin: String,
    mandatory: bool,
    executed: bool,
    executed_at: Option<DateTime<Utc>>,
    component_id: Option<i64>,
    component_qty: Option<f64>,
}

impl PlanItemRow {
    fn into_item(self) -> MfResult<ActivityPlanItem> {
        Ok(ActivityPlanItem {
            id: Some(self.id),
            order_id: Some(self.order_id),
            activity_id: self.activity_id,
            sequence: self.sequence,
            origin: PlanOrigin::parse(&self.origin)
                .ok_or_else(|| bad_row("plan origin", &self.origin))?,
            mandatory: self.mandatory,
            executed: self.executed,
            executed_at: self.executed_at,
            component_id: self.component_id,
            component_qty: self.component_qty,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: i64,
    order_id: i64,
    from_state: Option<String>,
    to_state: String,
    actor_id: i64,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> MfResult<StateHistoryEntry> {
        let from_state = match self.from_state {
            Some(s) => {
                Some(OrderState::parse(&s).ok_or_else(|| bad_row("history from_state", &s))?)
            }
            None => None,
        };
        Ok(StateHistoryEntry {
            id: Some(self.id),
            order_id: Some(self.order_id),
            from_state,
            to_state: OrderState::parse(&self.to_state)
                .ok_or_else(|| bad_row("history to_state", &self.to_state))?,
            actor_id: self.actor_id,
            note: self.note,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL order store
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_children(&self, order: ServiceOrder) -> MfResult<OrderAggregate> {
        let order_id = order
            .id
            .ok_or_else(|| MfError::Internal("loaded order without id".into()))?;

        let asset_rows = sqlx::query_as::<_, AssetRow>(
            r#"SELECT id, order_id, asset_id, "position", label, progress, started_at, finished_at
               FROM order_assets WHERE order_id = $1 ORDER BY "position""#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let plan_rows = sqlx::query_as::<_, PlanItemRow>(
            r#"SELECT id, order_id, activity_id, sequence, origin, mandatory, executed,
                      executed_at, component_id, component_qty
               FROM activity_plan_items WHERE order_id = $1 ORDER BY sequence"#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let history_rows = sqlx::query_as::<_, HistoryRow>(
            r#"SELECT id, order_id, from_state, to_state, actor_id, note, created_at
               FROM order_state_history WHERE order_id = $1 ORDER BY id"#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(OrderAggregate {
            order,
            assets: asset_rows
                .into_iter()
                .map(AssetRow::into_asset)
                .collect::<MfResult<_>>()?,
            plan: plan_rows
                .into_iter()
                .map(PlanItemRow::into_item)
                .collect::<MfResult<_>>()?,
            history: history_rows
                .into_iter()
                .map(HistoryRow::into_entry)
                .collect::<MfResult<_>>()?,
        })
    }

    async fn write_children(
        tx: &mut Transaction<'_, Postgres>,
        aggregate: &mut OrderAggregate,
    ) -> MfResult<()> {
        let order_id = aggregate
            .order
            .id
            .ok_or_else(|| MfError::Internal("cannot write children without order id".into()))?;

        for asset in &mut aggregate.assets {
            asset.order_id = Some(order_id);
            match asset.id {
                Some(id) => {
                    sqlx::query(
                        r#"UPDATE order_assets
                           SET progress = $1, started_at = $2, finished_at = $3
                           WHERE id = $4"#,
                    )
                    .bind(asset.progress.as_str())
                    .bind(asset.started_at)
                    .bind(asset.finished_at)
                    .bind(id)
                    .execute(&mut **tx)
                    .await
                    .map_err(db_err)?;
                }
                None => {
                    let id = sqlx::query_scalar::<_, i64>(
                        r#"INSERT INTO order_assets
                               (order_id, asset_id, "position", label, progress, started_at, finished_at)
                           VALUES ($1, $2, $3, $4, $5, $6, $7)
                           RETURNING id"#,
                    )
                    .bind(order_id)
                    .bind(asset.asset_id)
                    .bind(asset.position)
                    .bind(&asset.label)
                    .bind(asset.progress.as_str())
                    .bind(asset.started_at)
                    .bind(asset.finished_at)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(db_err)?;
                    asset.id = Some(id);
                }
            }
        }

        for item in &mut aggregate.plan {
            item.order_id = Some(order_id);
            match item.id {
                Some(id) => {
                    sqlx::query(
                        r#"UPDATE activity_plan_items
                           SET executed = $1, executed_at = $2
                           WHERE id = $3"#,
                    )
                    .bind(item.executed)
                    .bind(item.executed_at)
                    .bind(id)
                    .execute(&mut **tx)
                    .await
                    .map_err(db_err)?;
                }
                None => {
                    let id = sqlx::query_scalar::<_, i64>(
                        r#"INSERT INTO activity_plan_items
                               (order_id, activity_id, sequence, origin, mandatory, executed,
                                executed_at, component_id, component_qty)
                           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                           RETURNING id"#,
                    )
                    .bind(order_id)
                    .bind(item.activity_id)
                    .bind(item.sequence)
                    .bind(item.origin.as_str())
                    .bind(item.mandatory)
                    .bind(item.executed)
                    .bind(item.executed_at)
                    .bind(item.component_id)
                    .bind(item.component_qty)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(db_err)?;
                    item.id = Some(id);
                }
            }
        }

        // History is append-only: rows with an id are never touched again.
        for entry in &mut aggregate.history {
            entry.order_id = Some(order_id);
            if entry.id.is_none() {
                let id = sqlx::query_scalar::<_, i64>(
                    r#"INSERT INTO order_state_history
                           (order_id, from_state, to_state, actor_id, note, created_at)
                       VALUES ($1, $2, $3, $4, $5, $6)
                       RETURNING id"#,
                )
                .bind(order_id)
                .bind(entry.from_state.map(|s| s.as_str()))
                .bind(entry.to_state.as_str())
                .bind(entry.actor_id)
                .bind(&entry.note)
                .bind(entry.created_at)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_err)?;
                entry.id = Some(id);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, mut aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let order = &aggregate.order;
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO service_orders
                   (code, state, priority, description, service_type_id, client_id,
                    primary_asset_id, technician_id, approved_by_id, parts_shortage,
                    cancellation_reason, created_at, updated_at, scheduled_at, started_at,
                    finished_at, approved_at, cancelled_at, lock_version)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                       $11, $12, $13, $14, $15, $16, $17, $18, $19)
               RETURNING id"#,
        )
        .bind(&order.code)
        .bind(order.state.as_str())
        .bind(order.priority.as_str())
        .bind(&order.description)
        .bind(order.service_type_id)
        .bind(order.client_id)
        .bind(order.primary_asset_id)
        .bind(order.technician_id)
        .bind(order.approved_by_id)
        .bind(order.parts_shortage)
        .bind(&order.cancellation_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.scheduled_at)
        .bind(order.started_at)
        .bind(order.finished_at)
        .bind(order.approved_at)
        .bind(order.cancelled_at)
        .bind(order.lock_version)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        aggregate.order.id = Some(id);
        Self::write_children(&mut tx, &mut aggregate).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(aggregate)
    }

    async fn load(&self, order_id: Id) -> MfResult<OrderAggregate> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, code, state, priority, description, service_type_id, client_id,
                      primary_asset_id, technician_id, approved_by_id, parts_shortage,
                      cancellation_reason, created_at, updated_at, scheduled_at, started_at,
                      finished_at, approved_at, cancelled_at, lock_version
               FROM service_orders WHERE id = $1"#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| MfError::not_found("ServiceOrder", "id", order_id))?;

        self.load_children(row.into_order()?).await
    }

    async fn load_by_code(&self, code: &str) -> MfResult<OrderAggregate> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, code, state, priority, description, service_type_id, client_id,
                      primary_asset_id, technician_id, approved_by_id, parts_shortage,
                      cancellation_reason, created_at, updated_at, scheduled_at, started_at,
                      finished_at, approved_at, cancelled_at, lock_version
               FROM service_orders WHERE code = $1"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| MfError::not_found("ServiceOrder", "code", code))?;

        self.load_children(row.into_order()?).await
    }

    async fn commit(&self, mut aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
        let id = aggregate
            .order
            .id
            .ok_or_else(|| MfError::Internal("cannot commit an unsaved order".into()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let loaded_version = aggregate.order.lock_version;
        let order = &aggregate.order;
        let result = sqlx::query(
            r#"UPDATE service_orders
               SET state = $1, priority = $2, description = $3, technician_id = $4,
                   approved_by_id = $5, parts_shortage = $6, cancellation_reason = $7,
                   updated_at = $8, scheduled_at = $9, started_at = $10, finished_at = $11,
                   approved_at = $12, cancelled_at = $13, lock_version = lock_version + 1
               WHERE id = $14 AND lock_version = $15"#,
        )
        .bind(order.state.as_str())
        .bind(order.priority.as_str())
        .bind(&order.description)
        .bind(order.technician_id)
        .bind(order.approved_by_id)
        .bind(order.parts_shortage)
        .bind(&order.cancellation_reason)
        .bind(order.updated_at)
        .bind(order.scheduled_at)
        .bind(order.started_at)
        .bind(order.finished_at)
        .bind(order.approved_at)
        .bind(order.cancelled_at)
        .bind(id)
        .bind(loaded_version)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // Either the row vanished or someone committed first; both
            // surface as a retryable conflict after a reload.
            return Err(MfError::conflict(format!(
                "order {} was modified concurrently",
                order.code
            )));
        }

        aggregate.order.lock_version = loaded_version + 1;
        Self::write_children(&mut tx, &mut aggregate).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(aggregate)
    }
}

/// PostgreSQL counter store
///
/// The upsert is a single atomic increment-and-read; Postgres serializes the
/// conflicting upserts on the unique key, which gives the linearizability
/// the sequence generator requires.
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn next_value(
        &self,
        document_type: DocumentType,
        year: i32,
        month: u32,
    ) -> MfResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO order_sequence_counters (document_type, year, month, value)
               VALUES ($1, $2, $3, 1)
               ON CONFLICT (document_type, year, month)
               DO UPDATE SET value = order_sequence_counters.value + 1
               RETURNING value"#,
        )
        .bind(document_type.prefix())
        .bind(year)
        .bind(month as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}
