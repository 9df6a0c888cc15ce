//! REPL and thread-association DTOs and migrations

use loopdeck_core::error::{LoopdeckError, Result};
use loopdeck_core::repl::{Repl, ThreadAssociation};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use version_migrate::{IntoDomain, MigratesTo, Versioned};

pub const REPL_ENTITY: &str = "repl";
pub const THREAD_ENTITY: &str = "thread";

/// REPL record V1.0.0 (raw code stored under the REPL key).
#[derive(Debug, Clone, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct ReplRecordV1_0 {
    pub id: String,
    pub code: String,
}

/// REPL record V1.1.0 (added name, logical timestamps and archive flag).
#[derive(Debug, Clone, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.1.0")]
pub struct ReplRecordV1_1 {
    pub id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub archived: bool,
}

/// Type alias for the latest REPL record version.
pub type ReplRecordDTO = ReplRecordV1_1;

/// Thread association V1.0.0 (raw REPL id stored under the thread key).
#[derive(Debug, Clone, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct ThreadRecordV1_0 {
    pub thread_id: String,
    pub repl_id: String,
}

/// Thread association V1.1.0 (added attach timestamp).
#[derive(Debug, Clone, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.1.0")]
pub struct ThreadRecordV1_1 {
    pub thread_id: String,
    pub repl_id: String,
    #[serde(default)]
    pub attached_at: i64,
}

/// Type alias for the latest thread association version.
pub type ThreadRecordDTO = ThreadRecordV1_1;

// ============================================================================
// Migration implementations
// ============================================================================

/// Raw records carry no timestamps; zero sorts them after everything stamped.
impl MigratesTo<ReplRecordV1_1> for ReplRecordV1_0 {
    fn migrate(self) -> ReplRecordV1_1 {
        ReplRecordV1_1 {
            id: self.id,
            code: self.code,
            name: None,
            created_at: 0,
            last_updated: 0,
            archived: false,
        }
    }
}

impl MigratesTo<ThreadRecordV1_1> for ThreadRecordV1_0 {
    fn migrate(self) -> ThreadRecordV1_1 {
        ThreadRecordV1_1 {
            thread_id: self.thread_id,
            repl_id: self.repl_id,
            attached_at: 0,
        }
    }
}

// ============================================================================
// Domain model conversions
// ============================================================================

impl IntoDomain<Repl> for ReplRecordV1_1 {
    fn into_domain(self) -> Repl {
        Repl {
            id: self.id,
            code: self.code,
            name: self.name,
            created_at: self.created_at,
            last_updated: self.last_updated,
            archived: self.archived,
        }
    }
}

impl version_migrate::FromDomain<Repl> for ReplRecordV1_1 {
    fn from_domain(repl: Repl) -> Self {
        ReplRecordV1_1 {
            id: repl.id,
            code: repl.code,
            name: repl.name,
            created_at: repl.created_at,
            last_updated: repl.last_updated,
            archived: repl.archived,
        }
    }
}

impl IntoDomain<ThreadAssociation> for ThreadRecordV1_1 {
    fn into_domain(self) -> ThreadAssociation {
        ThreadAssociation {
            thread_id: self.thread_id,
            repl_id: self.repl_id,
            attached_at: self.attached_at,
        }
    }
}

impl version_migrate::FromDomain<ThreadAssociation> for ThreadRecordV1_1 {
    fn from_domain(assoc: ThreadAssociation) -> Self {
        ThreadRecordV1_1 {
            thread_id: assoc.thread_id,
            repl_id: assoc.repl_id,
            attached_at: assoc.attached_at,
        }
    }
}

// ============================================================================
// Migrator factory
// ============================================================================

/// Creates a Migrator for stored REPL records.
///
/// # Migration Path
///
/// - V1.0 → V1.1: Adds name, timestamps and archive flag
/// - V1.1 → Repl: Converts DTO to domain model
pub fn create_repl_migrator() -> version_migrate::Migrator {
    let mut migrator = version_migrate::Migrator::builder().build();

    let repl_path = version_migrate::Migrator::define(REPL_ENTITY)
        .from::<ReplRecordV1_0>()
        .step::<ReplRecordV1_1>()
        .into_with_save::<Repl>();

    migrator
        .register(repl_path)
        .expect("Failed to register repl migration path");

    migrator
}

/// Creates a Migrator for stored thread associations.
///
/// # Migration Path
///
/// - V1.0 → V1.1: Adds attach timestamp
/// - V1.1 → ThreadAssociation: Converts DTO to domain model
pub fn create_thread_migrator() -> version_migrate::Migrator {
    let mut migrator = version_migrate::Migrator::builder().build();

    let thread_path = version_migrate::Migrator::define(THREAD_ENTITY)
        .from::<ThreadRecordV1_0>()
        .step::<ThreadRecordV1_1>()
        .into_with_save::<ThreadAssociation>();

    migrator
        .register(thread_path)
        .expect("Failed to register thread migration path");

    migrator
}

// ============================================================================
// Store encoding
// ============================================================================

fn migration_error(entity: &str, e: impl std::fmt::Display) -> LoopdeckError {
    LoopdeckError::Serialization {
        format: "JSON".to_string(),
        message: format!("Failed to migrate {}: {}", entity, e),
    }
}

/// Parses a stored value, wrapping anything that is not a JSON object as the
/// V1.0 payload built by `legacy`.
fn stored_value(raw: &str, legacy: impl FnOnce() -> Value) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        _ => legacy(),
    }
}

/// Decodes a stored REPL value. The storage key is authoritative for the id.
pub fn decode_repl(id: &str, raw: &str) -> Result<Repl> {
    let value = stored_value(raw, || {
        json!({ "version": "1.0.0", "id": id, "code": raw })
    });
    let mut repl: Repl = create_repl_migrator()
        .load_flat_from(REPL_ENTITY, value)
        .map_err(|e| migration_error(REPL_ENTITY, e))?;
    repl.id = id.to_string();
    Ok(repl)
}

pub fn encode_repl(repl: &Repl) -> Result<String> {
    create_repl_migrator()
        .save_domain_flat(REPL_ENTITY, repl)
        .map_err(|e| migration_error(REPL_ENTITY, e))
}

/// Decodes a stored association. The storage key is authoritative for the
/// thread id.
pub fn decode_thread(thread_id: &str, raw: &str) -> Result<ThreadAssociation> {
    let value = stored_value(raw, || {
        json!({
            "version": "1.0.0",
            "thread_id": thread_id,
            "repl_id": raw.trim_matches('"'),
        })
    });
    let mut assoc: ThreadAssociation = create_thread_migrator()
        .load_flat_from(THREAD_ENTITY, value)
        .map_err(|e| migration_error(THREAD_ENTITY, e))?;
    assoc.thread_id = thread_id.to_string();
    Ok(assoc)
}

pub fn encode_thread(assoc: &ThreadAssociation) -> Result<String> {
    create_thread_migrator()
        .save_domain_flat(THREAD_ENTITY, assoc)
        .map_err(|e| migration_error(THREAD_ENTITY, e))
}
