//! Sequence generator
//!
//! Two simultaneous `next_code` calls for the same (type, month) must never
//! return the same number, so the store contract is increment-and-return in
//! one atomic step (upsert-returning-value or a row-level lock). If the
//! increment fails, the caller gets the error and no code is issued.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use mf_core::result::MfResult;
use mf_models::sequence::DocumentType;

/// Storage contract for the monthly counters
///
/// `next_value` must be linearizable across all callers system-wide: it
/// atomically increments the counter for (document_type, year, month) and
/// returns the incremented value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn next_value(
        &self,
        document_type: DocumentType,
        year: i32,
        month: u32,
    ) -> MfResult<i64>;
}

/// Produces order codes like "SO-202608-0001"
pub struct SequenceGenerator {
    store: std::sync::Arc<dyn CounterStore>,
    correlative_width: usize,
}

impl SequenceGenerator {
    pub fn new(store: std::sync::Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            correlative_width: 4,
        }
    }

    pub fn with_correlative_width(mut self, width: usize) -> Self {
        self.correlative_width = width;
        self
    }

    /// Issue the next unused code for the document type in the month of `as_of`.
    pub async fn next_code(
        &self,
        document_type: DocumentType,
        as_of: DateTime<Utc>,
    ) -> MfResult<String> {
        let (year, month) = (as_of.year(), as_of.month());
        let correlative = self.store.next_value(document_type, year, month).await?;

        let code = format!(
            "{}-{:04}{:02}-{:0width$}",
            document_type.prefix(),
            year,
            month,
            correlative,
            width = self.correlative_width,
        );
        tracing::debug!(code = %code, document_type = %document_type, "issued order code");
        Ok(code)
    }
}
