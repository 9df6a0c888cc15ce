pub mod config_service;
pub mod dto;
pub mod local_backend;
pub mod migration;
pub mod paths;
pub mod storage;
pub mod synced_backend;

pub use crate::config_service::ConfigService;
pub use crate::local_backend::LocalBackend;
pub use crate::migration::{MigrationOutcome, MigrationRunner};
pub use crate::paths::LoopdeckPaths;
pub use crate::storage::{FileKeyStore, KeyValueStore, MemoryKeyStore};
pub use crate::synced_backend::{AccountGraph, InMemoryAccountGraph, SyncedBackend};
