pub mod config;
pub mod engine;
pub mod error;
pub mod observer;
pub mod repl;

// Re-export common error type
pub use error::{EvaluationError, LoopdeckError};
