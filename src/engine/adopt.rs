// src/engine/adopt.rs

//! Adoption strategies and the copy-into-managed-storage move
//!
//! In-place adoption only writes a profile record; it never touches the
//! filesystem. A move copies the whole install tree (credential files
//! included) to a fresh managed path, records where it came from, and leaves
//! verification as a separate, explicit call. The original directory is
//! never deleted here.

use super::AdoptionEngine;
use crate::discovery::DiscoveryCandidate;
use crate::error::{Error, Result};
use crate::paths::{default_install_path, default_work_dir, expand_path};
use crate::profile::{
    default_runner_labels, default_runner_name, new_runner_id, now_iso8601, InstallMode,
    InstallRecord, MigrationStatus, RunnerProfile, ServiceProvider, ServiceRecord,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdoptionStrategy {
    /// Manage the runner where it sits.
    Adopt,
    /// Copy into managed storage; verify and delete-original follow as
    /// separate calls.
    MoveVerifyDelete,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdoptOptions {
    /// Consent to replace a detected external service with a managed one.
    #[serde(default)]
    pub replace_service: bool,
    /// Move destination override; defaults to managed storage.
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

impl AdoptionEngine {
    /// Adopt a previously scanned candidate. Ownership of the install path is
    /// re-checked here against the live store; the scan snapshot may be stale.
    pub async fn adopt(
        &self,
        candidate_id: &str,
        strategy: AdoptionStrategy,
        options: &AdoptOptions,
    ) -> Result<RunnerProfile> {
        let candidate = self.candidate(candidate_id)?;
        let _gate = self.adopt_guard().await;

        let install_path = expand_path(&candidate.install_path);
        let already_owned = self.store().get().runners.iter().any(|runner| {
            expand_path(&runner.install.install_path) == install_path
        });
        if already_owned {
            return Err(Error::Conflict(format!(
                "install path {} is already adopted",
                install_path.display()
            )));
        }
        if strategy == AdoptionStrategy::MoveVerifyDelete
            && candidate.service_present
            && !options.replace_service
        {
            return Err(Error::Conflict(
                "external service detected; consent to replace it before moving".into(),
            ));
        }

        let profile = new_profile(&candidate);
        let runner_id = profile.runner_id.clone();
        info!(
            "adopting {} as runner {runner_id} ({strategy:?})",
            candidate.install_path
        );
        self.store()
            .update(|registry| registry.runners.push(profile.clone()))?;

        if strategy == AdoptionStrategy::Adopt {
            return Ok(profile);
        }

        // Move flow. The id is visible to other callers the moment the
        // profile persists, so the runner lock must be held from here on.
        // Replace the external service before the runner can ever be started
        // from the new path; two services must never reference overlapping
        // resources.
        let _guard = self.runner_guard(&runner_id).await;
        if options.replace_service && profile.service.provider == ServiceProvider::External {
            self.replace_service_locked(&runner_id)?;
        }
        self.move_install_locked(&runner_id, options.destination.clone())
    }

    /// Move an adopted runner's files into managed storage. Public entry:
    /// stops anything running first and refuses while an external service is
    /// live.
    pub async fn move_install(
        &self,
        runner_id: &str,
        destination: Option<PathBuf>,
    ) -> Result<RunnerProfile> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store().find_runner(runner_id)?;
        if profile.service.provider == ServiceProvider::External {
            let status = self.service.external_status(&profile)?;
            if status.installed || status.running {
                return Err(Error::Conflict(
                    "external service detected; replace or remove it before moving".into(),
                ));
            }
        }
        self.processes.stop(runner_id);
        if profile.service.provider == ServiceProvider::Corral {
            let _ = self.service.stop(&profile);
        }
        self.move_install_locked(runner_id, destination)
    }

    /// Copy + re-point, assuming the caller already holds the runner's lock.
    pub(super) fn move_install_locked(
        &self,
        runner_id: &str,
        destination: Option<PathBuf>,
    ) -> Result<RunnerProfile> {
        let profile = self.store().find_runner(runner_id)?;
        if profile.install.mode == InstallMode::Managed {
            return Err(Error::PreconditionFailed("runner is already managed".into()));
        }
        let src = expand_path(&profile.install.install_path);
        let dest = match destination {
            Some(path) => path,
            None => default_install_path(runner_id)?,
        };
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "destination {} already exists",
                dest.display()
            )));
        }
        info!("moving runner {runner_id}: {} -> {}", src.display(), dest.display());
        copy_tree(&src, &dest)?;
        verify_copy(&src, &dest)?;

        let updated = self.store().update_runner(runner_id, |runner| {
            runner.install.mode = InstallMode::Managed;
            runner.install.install_path = dest.to_string_lossy().to_string();
            runner.install.adopted_from_path = Some(src.to_string_lossy().to_string());
            runner.install.migration_status = MigrationStatus::Moved;
        })?;

        // A managed service must point at the new path before verification
        // ever starts the runner there.
        if updated.service.provider == ServiceProvider::Corral && updated.service.installed {
            self.service.install(&updated)?;
        }
        Ok(updated)
    }
}

fn new_profile(candidate: &DiscoveryCandidate) -> RunnerProfile {
    let runner_id = new_runner_id();
    let runner_name = candidate
        .runner_name
        .clone()
        .unwrap_or_else(default_runner_name);
    let work_dir = candidate
        .work_dir
        .clone()
        .unwrap_or_else(|| default_work_dir(&runner_id).to_string_lossy().to_string());
    RunnerProfile {
        runner_id,
        display_name: runner_name.clone(),
        runner_name,
        scope: candidate.scope.clone(),
        labels: if candidate.labels.is_empty() {
            default_runner_labels()
        } else {
            candidate.labels.clone()
        },
        work_dir,
        install: InstallRecord {
            mode: InstallMode::Adopted,
            install_path: candidate.install_path.clone(),
            adopted_from_path: None,
            migration_status: MigrationStatus::None,
        },
        service: ServiceRecord {
            installed: candidate.service_present,
            run_on_boot: candidate.service_present,
            provider: if candidate.service_present {
                ServiceProvider::External
            } else {
                ServiceProvider::Unknown
            },
            external_id: candidate.service_id.clone(),
            external_path: candidate.service_path.clone(),
            external_restore: None,
        },
        created_at: now_iso8601(),
        last_seen_at: candidate.last_log_time.clone(),
    }
}

/// Byte-for-byte copy of the install tree, credential files included.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Err(Error::NotFound(format!("source path {}", src.display())));
    }
    fs::create_dir_all(dst).map_err(|err| Error::from_io("create destination", err))?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|err| {
            Error::Io(err.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walk error without io cause")
            }))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| Error::from_io("create dir", err))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|err| Error::from_io("copy file", err))?;
        }
        // Symlinks inside runner installs are not expected; skipped if present.
    }
    Ok(())
}

/// Spot-check the copy: the key scripts and `.runner` must exist at the
/// destination with matching sizes.
fn verify_copy(src: &Path, dst: &Path) -> Result<()> {
    let checks: &[&str] = if cfg!(target_os = "windows") {
        &["config.cmd", "run.cmd", ".runner"]
    } else {
        &["config.sh", "run.sh", ".runner"]
    };
    for file in checks {
        let src_file = src.join(file);
        if !src_file.exists() {
            continue;
        }
        let dst_file = dst.join(file);
        if !dst_file.exists() {
            return Err(Error::Io(std::io::Error::other(format!(
                "missing {file} after copy"
            ))));
        }
        if fs::metadata(&src_file)?.len() != fs::metadata(&dst_file)?.len() {
            return Err(Error::Io(std::io::Error::other(format!(
                "size mismatch for {file} after copy"
            ))));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_tree_preserves_nested_files() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("_diag")).expect("mkdir");
        fs::write(src.join("run.sh"), "#!/bin/sh\n").expect("write");
        fs::write(src.join(".credentials"), "secret").expect("write");
        fs::write(src.join("_diag").join("Runner_1.log"), "log").expect("write");

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).expect("copy");
        assert_eq!(
            fs::read_to_string(dst.join(".credentials")).expect("read"),
            "secret"
        );
        assert!(dst.join("_diag").join("Runner_1.log").exists());
    }

    #[test]
    fn verify_copy_detects_missing_file() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).expect("mkdir");
        fs::create_dir_all(&dst).expect("mkdir");
        fs::write(src.join(".runner"), "{}").expect("write");
        let err = verify_copy(&src, &dst).expect_err("should fail");
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn copy_tree_missing_source_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let err = copy_tree(&dir.path().join("absent"), &dir.path().join("dst"))
            .expect_err("should fail");
        assert!(matches!(err, Error::NotFound(_)));
    }
}
