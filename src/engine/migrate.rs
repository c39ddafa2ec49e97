// src/engine/migrate.rs

//! External-service migration
//!
//! `replace_service` disables an externally-owned OS service and installs a
//! managed one in its place, recording the external identity *before*
//! anything is disabled so the user can restore it by hand. Deleting the
//! external definition outright is a stricter, separate action that is never
//! invoked implicitly.

use super::AdoptionEngine;
use crate::error::{Error, Result};
use crate::paths::expand_path;
use crate::profile::{ExternalRestoreRecord, RunnerProfile, ServiceProvider};
use std::path::Path;
use tracing::info;

impl AdoptionEngine {
    /// Replace the external service owning this runner with a managed one.
    /// No-op when the service is not externally owned.
    pub async fn replace_service(&self, runner_id: &str) -> Result<RunnerProfile> {
        let _guard = self.runner_guard(runner_id).await;
        self.replace_service_locked(runner_id)
    }

    pub(super) fn replace_service_locked(&self, runner_id: &str) -> Result<RunnerProfile> {
        let profile = self.store().find_runner(runner_id)?;
        if profile.service.provider != ServiceProvider::External {
            return Ok(profile);
        }
        // Capture restore identity first; disabling may make it unreadable.
        let restore = ExternalRestoreRecord {
            id: profile.service.external_id.clone(),
            path: profile.service.external_path.clone(),
        };
        self.service.disable_external(&profile)?;
        self.service.install(&profile)?;
        info!(
            "runner {runner_id}: external service {:?} replaced with managed service",
            restore.id
        );
        self.store().update_runner(runner_id, |runner| {
            runner.service.installed = true;
            runner.service.run_on_boot = true;
            runner.service.provider = ServiceProvider::Corral;
            runner.service.external_restore = Some(restore.clone());
            runner.service.external_id = None;
            runner.service.external_path = None;
        })
    }

    /// Delete/unregister the external service definition itself. When the
    /// recorded identity has no id (Windows best-effort detection), the
    /// caller must confirm the exact service path; destructive actions never
    /// proceed automatically off a null id.
    pub async fn remove_external_artifacts(
        &self,
        runner_id: &str,
        confirm_path: Option<&Path>,
    ) -> Result<RunnerProfile> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store().find_runner(runner_id)?;
        if profile.service.provider != ServiceProvider::External {
            return Err(Error::PreconditionFailed(
                "no external service recorded for this runner".into(),
            ));
        }
        if profile.service.external_id.is_none() {
            let recorded = profile
                .service
                .external_path
                .as_deref()
                .map(expand_path)
                .ok_or_else(|| {
                    Error::PreconditionFailed(
                        "external service has neither id nor path recorded".into(),
                    )
                })?;
            match confirm_path {
                Some(confirmed) if expand_path(&confirmed.to_string_lossy()) == recorded => {}
                _ => {
                    return Err(Error::PreconditionFailed(format!(
                        "external service identity is unconfirmed; pass the service path {} to confirm removal",
                        recorded.display()
                    )));
                }
            }
        }
        let removed = ExternalRestoreRecord {
            id: profile.service.external_id.clone(),
            path: profile.service.external_path.clone(),
        };
        self.service.remove_external(&profile)?;
        info!(
            "runner {runner_id}: external service artifacts removed ({:?})",
            removed.id
        );
        self.store().update_runner(runner_id, |runner| {
            runner.service.installed = false;
            runner.service.run_on_boot = false;
            runner.service.provider = ServiceProvider::Unknown;
            runner.service.external_restore = Some(removed.clone());
            runner.service.external_id = None;
            runner.service.external_path = None;
        })
    }
}
