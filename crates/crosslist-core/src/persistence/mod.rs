//! Persistence layer for reconciliation state
//!
//! A single SQLite database per list pair holds both sides' items, their links
//! and an append-only operation log.

mod schema;
mod store;

pub use schema::{Schema, SCHEMA_VERSION};
pub use store::{Projection, StateStore, StoreStatistics};
