//! Data Transfer Objects (DTOs) for the local store.
//!
//! These DTOs are the versioned on-disk schema, decoded through
//! `version_migrate` migrators. They are private to the infrastructure layer;
//! the rest of the workspace only sees domain models.
//!
//! ### REPL record version history
//! - **1.0.0**: raw code string stored under the REPL key
//! - **1.1.0**: JSON object with name, logical timestamps and archive flag
//!
//! ### Thread record version history
//! - **1.0.0**: raw REPL id string
//! - **1.1.0**: JSON object with attach timestamp

mod repl;

pub use repl::{
    REPL_ENTITY, ReplRecordDTO, ReplRecordV1_0, ReplRecordV1_1, THREAD_ENTITY, ThreadRecordDTO,
    ThreadRecordV1_0, ThreadRecordV1_1, create_repl_migrator, create_thread_migrator, decode_repl,
    decode_thread, encode_repl, encode_thread,
};
