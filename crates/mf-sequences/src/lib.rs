//! # mf-sequences
//!
//! Unique, human-readable order identifiers per document type and calendar
//! month: `<TYPE>-<YYYYMM>-<NNNN>`.
//!
//! Uniqueness rests on the [`CounterStore`] performing a single atomic
//! increment-and-read; the generator never reads then writes.

pub mod generator;

pub use generator::{CounterStore, SequenceGenerator};
