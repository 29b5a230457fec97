//! In-memory store
//!
//! Transactional enough for tests and seed data: commits are serialized
//! behind one lock and apply the same lock_version check as the Postgres
//! store, so the orchestrator's conflict path is exercised identically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use mf_core::error::MfError;
use mf_core::result::MfResult;
use mf_core::traits::Id;
use mf_models::sequence::DocumentType;
use mf_sequences::CounterStore;
use parking_lot::RwLock;

use crate::store::{OrderAggregate, OrderStore};

/// In-memory order store with optimistic locking
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<Id, OrderAggregate>>,
    next_id: AtomicI64,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn assign_child_ids(&self, aggregate: &mut OrderAggregate) {
        let order_id = aggregate.order.id;
        for asset in &mut aggregate.assets {
            asset.order_id = order_id;
            if asset.id.is_none() {
                asset.id = Some(self.allocate_id());
            }
        }
        for item in &mut aggregate.plan {
            item.order_id = order_id;
            if item.id.is_none() {
                item.id = Some(self.allocate_id());
            }
        }
        for entry in &mut aggregate.history {
            entry.order_id = order_id;
            if entry.id.is_none() {
                entry.id = Some(self.allocate_id());
            }
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, mut aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
        let mut orders = self.orders.write();
        if orders.values().any(|a| a.order.code == aggregate.order.code) {
            return Err(MfError::conflict(format!(
                "order code {} already exists",
                aggregate.order.code
            )));
        }
        let id = self.allocate_id();
        aggregate.order.id = Some(id);
        self.assign_child_ids(&mut aggregate);
        orders.insert(id, aggregate.clone());
        Ok(aggregate)
    }

    async fn load(&self, order_id: Id) -> MfResult<OrderAggregate> {
        self.orders
            .read()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| MfError::not_found("ServiceOrder", "id", order_id))
    }

    async fn load_by_code(&self, code: &str) -> MfResult<OrderAggregate> {
        self.orders
            .read()
            .values()
            .find(|a| a.order.code == code)
            .cloned()
            .ok_or_else(|| MfError::not_found("ServiceOrder", "code", code))
    }

    async fn commit(&self, mut aggregate: OrderAggregate) -> MfResult<OrderAggregate> {
        let id = aggregate
            .order
            .id
            .ok_or_else(|| MfError::Internal("cannot commit an unsaved order".into()))?;

        let mut orders = self.orders.write();
        let stored = orders
            .get(&id)
            .ok_or_else(|| MfError::not_found("ServiceOrder", "id", id))?;

        if stored.order.lock_version != aggregate.order.lock_version {
            return Err(MfError::conflict(format!(
                "order {} was modified concurrently (expected version {}, found {})",
                aggregate.order.code, aggregate.order.lock_version, stored.order.lock_version
            )));
        }

        aggregate.order.lock_version += 1;
        self.assign_child_ids(&mut aggregate);
        orders.insert(id, aggregate.clone());
        Ok(aggregate)
    }
}

/// In-memory counter store
///
/// The increment happens under the map entry's shard lock, making each
/// `next_value` a single atomic increment-and-read.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<(DocumentType, i32, u32), i64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn next_value(
        &self,
        document_type: DocumentType,
        year: i32,
        month: u32,
    ) -> MfResult<i64> {
        let mut entry = self.counters.entry((document_type, year, month)).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}
