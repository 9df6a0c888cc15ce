//! Engine domain module.
//!
//! - `state`: `EngineState` and loading progress
//! - `traits`: contracts for the external pattern engine and editor
//! - `classify`: advisory error classification
//! - `policy`: revert-on-error decision

pub mod classify;
pub mod policy;
mod state;
mod traits;

pub use classify::{ErrorKind, classify_error, describe_error, missing_sample_name};
pub use policy::{PolicyAction, decide};
pub use state::{EngineState, LoadingProgress};
pub use traits::{
    ContainerHandle, EditorFactory, EditorSurface, EngineFault, Pattern, PatternEngine,
    ProgressSink,
};
