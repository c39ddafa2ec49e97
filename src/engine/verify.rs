// src/engine/verify.rs

//! Functional verification of a runner at its current install path
//!
//! Stop whatever is running, start from the current path, and poll the
//! runner's own diagnostic log for a ready marker within a bounded timeout.
//! The outcome lands in `migration_status`; the original path is never
//! touched here, whatever happens. Re-runnable after a failure.

use super::AdoptionEngine;
use crate::error::{Error, Result};
use crate::profile::{InstallMode, MigrationStatus, ServiceProvider};
use crate::runner;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// How long to wait for the ready marker.
    pub timeout: Duration,
    /// Log poll cadence.
    pub poll_interval: Duration,
    /// Cancelling ends only the polling wait; the started runner keeps
    /// running and `migration_status` is left as it was.
    pub cancel: Option<CancellationToken>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_VERIFY_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            cancel: None,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct VerifyOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl AdoptionEngine {
    pub async fn verify(&self, runner_id: &str, options: &VerifyOptions) -> Result<VerifyOutcome> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store().find_runner(runner_id)?;

        if profile.service.provider == ServiceProvider::External {
            return Err(Error::Conflict(
                "external service is managing this runner; replace or remove it first".into(),
            ));
        }
        // A moved install without its origin recorded has nothing to be
        // verified against; in-place adoptions verify their single path.
        if profile.install.mode == InstallMode::Managed
            && profile.install.adopted_from_path.is_none()
        {
            return Err(Error::PreconditionFailed(
                "managed install has no recorded origin to verify against".into(),
            ));
        }

        let was_child_running = self.processes.is_running(runner_id);
        let service_status = self.service.status(&profile)?;
        if was_child_running {
            self.processes.stop(runner_id);
        }
        if service_status.running {
            let _ = self.service.stop(&profile);
        }

        let via_service =
            profile.service.provider == ServiceProvider::Corral && profile.service.installed;
        if via_service {
            self.service.start(&profile)?;
        } else {
            self.processes.start(&profile)?;
        }

        let log_dir = runner::diag_dir(&profile);
        let started = Instant::now();
        let mut ok = false;
        while started.elapsed() < options.timeout {
            if runner::has_ready_marker(&log_dir)? {
                ok = true;
                break;
            }
            if let Some(cancel) = &options.cancel {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("verify {runner_id}: polling cancelled, runner left running");
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
            } else {
                tokio::time::sleep(options.poll_interval).await;
            }
        }

        // Put things back the way they were before the check.
        if via_service && !service_status.running {
            let _ = self.service.stop(&profile);
        }
        if !via_service && !was_child_running {
            self.processes.stop(runner_id);
        }

        let status = if ok {
            MigrationStatus::Verified
        } else {
            MigrationStatus::Failed
        };
        self.store()
            .update_runner(runner_id, |runner| {
                runner.install.migration_status = status;
            })?;
        info!("verify {runner_id}: {:?}", status);

        Ok(VerifyOutcome {
            ok,
            reason: (!ok).then(|| {
                format!(
                    "no ready marker in runner log within {}s",
                    options.timeout.as_secs()
                )
            }),
        })
    }
}
