//! REPL domain module.
//!
//! # Module Structure
//!
//! - `model`: `Repl`, `ReplSummary`, `ThreadAssociation`, list-change events
//! - `repository`: the `ReplStorage` trait implemented by each backend
//! - `clock`: logical timestamps for `created_at` / `last_updated`

mod clock;
mod model;
mod repository;

pub use clock::LogicalClock;
pub use model::{Repl, ReplListChanged, ReplSummary, ThreadAssociation, sort_by_recency};
pub use repository::{AuthState, ReplStorage, StorageReadiness};
