//! REPL domain model.
//!
//! A REPL is one persisted, independently playable code session. Thread
//! associations link externally-owned conversation threads to a REPL.

use serde::{Deserialize, Serialize};

/// A persisted code session.
///
/// This is the "pure" domain model that business logic operates on,
/// independent of any specific storage format or version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repl {
    /// Unique REPL identifier (UUID format). Never changes after creation.
    pub id: String,
    /// Pattern source code
    pub code: String,
    /// Optional display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Logical creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Logical timestamp of the last save (Unix milliseconds)
    pub last_updated: i64,
    /// Archived REPLs are hidden from listings but still resolvable by id
    #[serde(default)]
    pub archived: bool,
}

impl Repl {
    pub fn summary(&self) -> ReplSummary {
        ReplSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            last_updated: self.last_updated,
        }
    }
}

/// Listing entry returned by `ReplStorage::get_all_repls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplSummary {
    pub id: String,
    pub name: Option<String>,
    pub last_updated: i64,
}

/// Association of one conversation thread with exactly one REPL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadAssociation {
    pub thread_id: String,
    pub repl_id: String,
    /// Logical timestamp of the attach; the newest wins in `get_thread_for_repl`.
    pub attached_at: i64,
}

/// Notification that the REPL listing may have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplListChanged {
    Saved { id: String },
    Archived { id: String },
    Unarchived { id: String },
    Deleted { id: String },
    /// Bulk change (initial sync, migration cleanup).
    Reloaded,
}

/// Sorts summaries newest first.
pub fn sort_by_recency(summaries: &mut [ReplSummary]) {
    summaries.sort_by(|a, b| {
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| a.id.cmp(&b.id))
    });
}
