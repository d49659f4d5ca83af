//! Moves a guest's word sets into their account, once per account and device.

use std::cell::{Cell, RefCell};

use crate::{
    error::Result,
    local::LocalStore,
    remote::{RemoteBackend, RemoteStore},
    storage::KeyValueStorage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum MigrationPhase {
    Idle,
    CheckPending,
    Migrating,
    Finalizing,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct MigratedSet {
    pub local_id: String,
    pub remote_id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FailedSet {
    pub local_id: String,
    pub name: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MigrationReport {
    pub migrated: Vec<MigratedSet>,
    pub failed: Vec<FailedSet>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The account already has a completed migration on this device.
    AlreadyDone,
    /// No guest data was found; leftovers were cleared.
    NothingToMigrate,
    /// Every set made it; local guest data is gone and the account is marked.
    Completed(MigrationReport),
    /// Some sets failed. Local data is untouched and a later pass will try again.
    Partial(MigrationReport),
    /// Another pass is in flight.
    AlreadyRunning,
}

impl MigrationOutcome {
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            MigrationOutcome::Completed(report) | MigrationOutcome::Partial(report) => Some(report),
            _ => None,
        }
    }
}

/// Drives the guest-to-account migration.
///
/// Holds no stores of its own; the caller passes the pair it is switching
/// between. Sets are migrated strictly one at a time, and local data is only
/// cleared after the whole batch went through.
#[derive(Debug)]
pub struct SyncReconciler {
    phase: Cell<MigrationPhase>,
    running: Cell<bool>,
    last_report: RefCell<Option<MigrationReport>>,
}

impl Default for SyncReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the in-flight flag however the pass ends.
struct RunGuard<'a>(&'a SyncReconciler);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.phase.set(MigrationPhase::Idle);
        self.0.running.set(false);
    }
}

impl SyncReconciler {
    pub fn new() -> Self {
        Self {
            phase: Cell::new(MigrationPhase::Idle),
            running: Cell::new(false),
            last_report: RefCell::new(None),
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Report of the most recent pass that attempted any sets.
    pub fn last_report(&self) -> Option<MigrationReport> {
        self.last_report.borrow().clone()
    }

    fn enter(&self, phase: MigrationPhase) {
        log::debug!("Migration phase {:?} -> {phase:?}", self.phase.get());
        self.phase.set(phase);
    }

    /// Runs one migration pass for `account_id`.
    ///
    /// Per-set failures end up in the report. Errors reading or clearing the
    /// local store abort the pass and are returned.
    pub async fn check_pending<S, B>(
        &self,
        local: &LocalStore<S>,
        remote: &RemoteStore<B>,
        account_id: &str,
    ) -> Result<MigrationOutcome>
    where
        S: KeyValueStorage,
        B: RemoteBackend,
    {
        if self.running.replace(true) {
            log::warn!("Migration for {account_id} requested while another is running");
            return Ok(MigrationOutcome::AlreadyRunning);
        }
        let _guard = RunGuard(self);

        self.enter(MigrationPhase::CheckPending);
        if local.is_migration_done(account_id).await? {
            log::debug!("Guest data already migrated to {account_id}");
            return Ok(MigrationOutcome::AlreadyDone);
        }
        if !local.has_any_data().await? {
            local.clear().await?;
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        self.enter(MigrationPhase::Migrating);
        let snapshot = local.list_sets().await?;
        log::info!(
            "Migrating {} guest sets to account {account_id}",
            snapshot.len()
        );

        let mut report = MigrationReport::default();
        for set in snapshot {
            match remote
                .create_set(
                    &set.name,
                    set.words.clone(),
                    &set.target_language,
                    &set.native_language,
                )
                .await
            {
                Ok(created) => report.migrated.push(MigratedSet {
                    local_id: set.id,
                    remote_id: created.id,
                    name: set.name,
                }),
                Err(e) => {
                    log::error!("Failed to migrate set `{}` ({}): {e}", set.name, set.id);
                    report.failed.push(FailedSet {
                        local_id: set.id,
                        name: set.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.enter(MigrationPhase::Finalizing);
        *self.last_report.borrow_mut() = Some(report.clone());

        if !report.is_complete() {
            log::warn!(
                "Migration to {account_id} incomplete: {} migrated, {} failed; keeping guest data",
                report.migrated.len(),
                report.failed.len()
            );
            return Ok(MigrationOutcome::Partial(report));
        }

        local.clear().await?;
        match remote.list_sets().await {
            Ok(sets) => log::info!("Account {account_id} now has {} sets", sets.len()),
            Err(e) => log::warn!("Could not refresh sets after migration: {e}"),
        }
        local.mark_migration_done(account_id).await?;
        log::info!(
            "Migration to {account_id} complete ({} sets)",
            report.migrated.len()
        );

        Ok(MigrationOutcome::Completed(report))
    }
}
