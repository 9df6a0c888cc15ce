//! Engine coordination: the single audio + editor resource.

mod lifecycle;

pub use lifecycle::{ResourceLifecycleManager, UpdateResult};
