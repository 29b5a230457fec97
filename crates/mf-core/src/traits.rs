//! Core traits and collaborator contracts
//!
//! The order engine talks to the rest of the system exclusively through the
//! traits defined here (plus the store traits in mf-db and the catalog trait
//! in mf-plans). Implementations live outside this core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::MfResult;

/// Primary key type
pub type Id = i64;

/// Trait for entities that have a primary key
pub trait Identifiable {
    fn id(&self) -> Option<Id>;
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
    fn is_new_record(&self) -> bool {
        !self.is_persisted()
    }
}

/// Trait for entities with timestamps (created_at, updated_at)
pub trait Timestamped {
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

/// Trait for lockable entities (optimistic locking)
pub trait Lockable {
    fn lock_version(&self) -> i32;
}

/// Base trait for all domain entities
pub trait Entity: Identifiable + Send + Sync {
    /// The database table name
    const TABLE_NAME: &'static str;

    /// Human-readable type name for error messages
    const TYPE_NAME: &'static str;
}

/// The identity performing an operation (dispatcher, technician, batch script)
pub trait ActorContext: Send + Sync {
    fn actor_id(&self) -> Id;
    fn is_dispatcher(&self) -> bool;
    fn is_technician(&self) -> bool;
}

/// A plain actor reference, sufficient for most orchestrator calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub id: Id,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Dispatcher,
    Technician,
    Administrator,
    System,
}

impl Actor {
    pub fn dispatcher(id: Id) -> Self {
        Self {
            id,
            role: ActorRole::Dispatcher,
        }
    }

    pub fn technician(id: Id) -> Self {
        Self {
            id,
            role: ActorRole::Technician,
        }
    }

    pub fn system() -> Self {
        Self {
            id: 0,
            role: ActorRole::System,
        }
    }
}

impl ActorContext for Actor {
    fn actor_id(&self) -> Id {
        self.id
    }

    fn is_dispatcher(&self) -> bool {
        matches!(self.role, ActorRole::Dispatcher | ActorRole::Administrator)
    }

    fn is_technician(&self) -> bool {
        self.role == ActorRole::Technician
    }
}

/// Client record as exposed by the directory collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Id,
    pub name: String,
    pub active: bool,
}

/// Technician/client directory collaborator
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Whether the technician exists and may be assigned work
    async fn is_active_technician(&self, id: Id) -> MfResult<bool>;

    /// Look up a client; `NotFound` if unknown
    async fn get_client(&self, id: Id) -> MfResult<Client>;
}

/// Inventory/stock ledger collaborator
///
/// Consulted only when an activity consumes a tracked part. A refusal
/// (insufficient stock) is a business error for the caller, not an internal
/// failure of this core.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn reserve_or_consume(&self, component_id: Id, qty: f64) -> MfResult<()>;
}
