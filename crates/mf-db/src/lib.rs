//! # mf-db
//!
//! Persistence layer for Maintflow RS.
//!
//! The order engine talks to storage through [`store::OrderStore`] (the whole
//! order aggregate read and committed as one atomic unit) and the counter
//! store from mf-sequences. Two implementations ship here:
//!
//! - [`memory`]: a transactional in-memory store for tests and seeding
//! - [`postgres`]: a PostgreSQL store using SQLx with optimistic locking

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::{MemoryCounterStore, MemoryOrderStore};
pub use pool::Database;
pub use postgres::{PgCounterStore, PgOrderStore};
pub use store::{OrderAggregate, OrderStore};
