//! One-time migration of local REPLs into the synced account.
//!
//! Runs when a user signs in for the first time on a profile that holds
//! anonymous REPLs. The persisted `migration-done` flag and the "account
//! already has data" check both make re-runs no-ops. A run that fails after
//! pushing leaves a `migration-started` marker; the next run resumes the
//! upserts instead of treating the partial copy as existing account data.

use crate::local_backend::LocalBackend;
use crate::synced_backend::SyncedBackend;
use loopdeck_core::repl::ReplStorage;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a migration attempt. Migration never fails loudly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Not authenticated or the synced store has not loaded yet.
    NotReady,
    /// The done flag was already set.
    AlreadyDone,
    /// The account already had REPLs; local data was discarded.
    SkippedRemoteHasData,
    /// Only untouched starter REPLs existed locally.
    NothingToMigrate,
    Migrated { repls: usize, threads: usize },
    /// Migration stopped; local data is intact, the flag is unset and the
    /// next run resumes.
    Failed { migrated: usize, error: String },
}

impl MigrationOutcome {
    /// True when the done flag is now set.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::AlreadyDone
                | Self::SkippedRemoteHasData
                | Self::NothingToMigrate
                | Self::Migrated { .. }
        )
    }
}

pub struct MigrationRunner {
    local: Arc<LocalBackend>,
    synced: Arc<SyncedBackend>,
}

impl MigrationRunner {
    pub fn new(local: Arc<LocalBackend>, synced: Arc<SyncedBackend>) -> Self {
        Self { local, synced }
    }

    pub async fn run(&self) -> MigrationOutcome {
        let readiness = self.synced.readiness();
        if !readiness.is_authenticated || !readiness.is_loaded {
            tracing::debug!("[MigrationRunner] Not ready: {:?}", readiness);
            return MigrationOutcome::NotReady;
        }

        match self.local.is_migration_done() {
            Ok(true) => return MigrationOutcome::AlreadyDone,
            Ok(false) => {}
            Err(e) => return self.failed(0, e.to_string()),
        }

        let resuming = match self.local.is_migration_started() {
            Ok(started) => started,
            Err(e) => return self.failed(0, e.to_string()),
        };

        if !resuming && self.synced.has_any_repl() {
            tracing::info!("[MigrationRunner] Account already has REPLs, discarding local copies");
            if let Err(e) = self.local.clear_repls_and_threads() {
                tracing::warn!("[MigrationRunner] Failed to clear local REPLs: {}", e);
            }
            return self.finish(MigrationOutcome::SkippedRemoteHasData);
        }

        let candidates = match self.local.list_all_repls() {
            Ok(repls) => repls,
            Err(e) => return self.failed(0, e.to_string()),
        };
        let config = self.local.config();
        let real: Vec<_> = candidates
            .into_iter()
            .filter(|r| !config.is_default_code(&r.code))
            .collect();

        if real.is_empty() {
            tracing::debug!("[MigrationRunner] No edited local REPLs");
            return self.finish(MigrationOutcome::NothingToMigrate);
        }

        if resuming {
            tracing::info!("[MigrationRunner] Resuming interrupted migration");
        } else if let Err(e) = self.local.mark_migration_started() {
            return self.failed(0, e.to_string());
        }

        let mut migrated = 0;
        let mut migrated_ids = HashSet::new();
        for repl in &real {
            // Records already in the account are never overwritten.
            if resuming && self.synced.has_repl(&repl.id) {
                tracing::debug!("[MigrationRunner] REPL {} already migrated", repl.id);
            } else if let Err(e) = self.synced.try_put_repl(repl).await {
                return self.failed(migrated, e.to_string());
            }
            migrated += 1;
            migrated_ids.insert(repl.id.clone());
        }

        let associations = match self.local.all_thread_associations() {
            Ok(assocs) => assocs,
            Err(e) => return self.failed(migrated, e.to_string()),
        };
        let mut threads = 0;
        for assoc in associations
            .iter()
            .filter(|a| migrated_ids.contains(&a.repl_id))
        {
            match self.synced.try_put_thread(assoc).await {
                Ok(true) => threads += 1,
                Ok(false) => {}
                Err(e) => return self.failed(migrated, e.to_string()),
            }
        }

        // The active pointer is shared with the local store and stays as is.
        if let Err(e) = self.local.clear_repls_and_threads() {
            tracing::warn!("[MigrationRunner] Failed to clear migrated local REPLs: {}", e);
        }

        tracing::info!(
            "[MigrationRunner] Migrated {} REPLs and {} threads",
            migrated,
            threads
        );
        self.finish(MigrationOutcome::Migrated {
            repls: migrated,
            threads,
        })
    }

    fn finish(&self, outcome: MigrationOutcome) -> MigrationOutcome {
        match self.local.mark_migration_done() {
            Ok(()) => outcome,
            Err(e) => self.failed(0, format!("could not record completion: {}", e)),
        }
    }

    fn failed(&self, migrated: usize, error: String) -> MigrationOutcome {
        tracing::warn!(
            "[MigrationRunner] Migration failed after {} REPLs: {}",
            migrated,
            error
        );
        MigrationOutcome::Failed { migrated, error }
    }
}
