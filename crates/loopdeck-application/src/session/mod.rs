//! REPL session management.
//!
//! # Module Structure
//!
//! - `manager`: `ReplSessionManager`, REPL selection and thread association
//! - `autosave`: `AutoSaver`, the debounced write-back

mod autosave;
mod manager;

pub use autosave::AutoSaver;
pub use manager::ReplSessionManager;
