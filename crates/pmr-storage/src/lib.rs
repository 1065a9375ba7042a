//! Storage layer for the pain-management review workflow.
//!
//! [`ReviewStore`] is the authoritative store contract. Two implementations:
//!
//! - [`Database`]: Turso-backed, durable, used by the `pmr` CLI
//! - [`MemoryStore`]: in-process maps, used by tests and embedders
//!
//! Both apply every state change as a compare-and-swap on the entity's
//! revision and status, so two writers racing on the same row produce one
//! success and one `Conflict`.

pub mod db;
pub mod memory;
pub mod store;

pub use db::{Database, DbError, TableCounts};
pub use memory::MemoryStore;
pub use store::ReviewStore;
