//! Application layer for Loopdeck.
//!
//! This crate coordinates the shared engine resource, REPL sessions and the
//! storage backends provided by the infrastructure layer.

pub mod bootstrap;
pub mod engine;
pub mod session;

pub use bootstrap::{LoopdeckSession, SelectedStorage, SessionBootstrap, select_storage};
pub use engine::{ResourceLifecycleManager, UpdateResult};
pub use session::{AutoSaver, ReplSessionManager};
