// src/engine/rollback.rs

//! Rollback of unverified migrations and deletion of verified originals
//!
//! Rollback re-points an unverified migration at its original install. The
//! copied files at the abandoned managed path are left for manual cleanup.
//! Delete-original is the only operation that ever clears
//! `adopted_from_path`, and only after every precondition is re-checked at
//! call time.

use super::AdoptionEngine;
use crate::discovery::looks_like_runner_install;
use crate::error::{Error, Result};
use crate::paths::expand_path;
use crate::profile::{InstallMode, MigrationStatus, RunnerProfile, ServiceProvider};
use std::fs;
use tracing::{info, warn};

impl AdoptionEngine {
    /// Revert an unverified migration to its original install path.
    pub async fn rollback(&self, runner_id: &str) -> Result<RunnerProfile> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store().find_runner(runner_id)?;

        if profile.install.migration_status == MigrationStatus::Verified {
            // The user may already have acted on the verified install.
            return Err(Error::PreconditionFailed(
                "migration is verified; rollback is no longer allowed".into(),
            ));
        }
        if profile.service.provider == ServiceProvider::External {
            return Err(Error::Conflict(
                "external service is managing this runner; replace or remove it first".into(),
            ));
        }
        let original = profile
            .install
            .adopted_from_path
            .clone()
            .ok_or_else(|| Error::PreconditionFailed("no original install recorded".into()))?;
        let original_path = expand_path(&original);
        if !original_path.exists() || !looks_like_runner_install(&original_path) {
            return Err(Error::PreconditionFailed(format!(
                "original install at {} is missing or not a runner directory",
                original_path.display()
            )));
        }

        let managed_service = profile.service.provider == ServiceProvider::Corral
            && profile.service.installed;
        self.processes.stop(runner_id);
        if managed_service {
            let _ = self.service.stop(&profile);
            self.service.uninstall(&profile)?;
        }

        let abandoned = profile.install.install_path.clone();
        let updated = self.store().update_runner(runner_id, |runner| {
            runner.install.mode = InstallMode::Adopted;
            runner.install.install_path = original.clone();
            runner.install.migration_status = MigrationStatus::None;
            // adopted_from_path stays: a move was attempted, and only a
            // successful delete-original clears it.
        })?;
        if managed_service {
            self.service.install(&updated)?;
        }
        info!(
            "runner {runner_id} rolled back to {original}; copy at {abandoned} left for manual cleanup"
        );
        Ok(updated)
    }

    /// Recursively delete the original install of a verified migration.
    /// Preconditions are re-resolved at call time; failure leaves all state
    /// unchanged.
    pub async fn delete_original(&self, runner_id: &str) -> Result<()> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store().find_runner(runner_id)?;

        if profile.install.migration_status != MigrationStatus::Verified {
            return Err(Error::PreconditionFailed(
                "runner has not been verified since migration".into(),
            ));
        }
        let original = profile
            .install
            .adopted_from_path
            .clone()
            .ok_or_else(|| Error::PreconditionFailed("no original install recorded".into()))?;
        let original_path = expand_path(&original);

        if profile.service.provider == ServiceProvider::External
            || profile.service.external_id.is_some()
            || profile.service.external_path.is_some()
        {
            return Err(Error::Conflict(
                "an external service is still recorded for this runner".into(),
            ));
        }
        // Re-resolve against the live service manager; the profile record
        // could be stale.
        if let Some(descriptor) = self.service.identity(&original_path)? {
            warn!(
                "delete-original blocked for {runner_id}: service {:?} still references {}",
                descriptor.id,
                original_path.display()
            );
            return Err(Error::Conflict(format!(
                "a service still references the original install at {}",
                original_path.display()
            )));
        }
        if !looks_like_runner_install(&original_path) {
            return Err(Error::PreconditionFailed(format!(
                "{} does not look like a runner install",
                original_path.display()
            )));
        }

        fs::remove_dir_all(&original_path)
            .map_err(|err| Error::from_io("delete original install", err))?;
        self.store().update_runner(runner_id, |runner| {
            runner.install.adopted_from_path = None;
        })?;
        info!("runner {runner_id}: original install {original} deleted");
        Ok(())
    }
}
