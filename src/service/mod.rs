// src/service/mod.rs

//! OS service management behind one capability interface
//!
//! Three platform backends (launchd, systemd user units, the runner's
//! `svc.cmd` helper on Windows) implement `ServiceControl`. The engine only
//! ever talks to the trait, which also makes the orchestrator testable with a
//! scripted double. Identity resolution extracts the *declared* service
//! identity for an install path, never a filename guess.

use crate::error::{Error, Result};
use crate::profile::{RunnerProfile, ServiceProvider};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[derive(Debug, Serialize, Clone, Copy, Default)]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
    pub enabled: bool,
}

/// The resolved identity of an OS service entry bound to an install path.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub provider: ServiceProvider,
    /// May be `None` on Windows, where identity confidence is lower.
    pub id: Option<String>,
    pub path: Option<String>,
}

/// Platform capability surface for runner services.
pub trait ServiceControl: Send + Sync {
    /// Install and start a managed service for the profile's current
    /// install path.
    fn install(&self, profile: &RunnerProfile) -> Result<()>;

    /// Stop and remove the managed service definition.
    fn uninstall(&self, profile: &RunnerProfile) -> Result<()>;

    fn enable_on_boot(&self, profile: &RunnerProfile, enabled: bool) -> Result<()>;

    fn start(&self, profile: &RunnerProfile) -> Result<()>;

    fn stop(&self, profile: &RunnerProfile) -> Result<()>;

    fn status(&self, profile: &RunnerProfile) -> Result<ServiceStatus>;

    /// Status of the external service recorded on the profile.
    fn external_status(&self, profile: &RunnerProfile) -> Result<ServiceStatus>;

    /// Disable/unload the external service without deleting its definition.
    fn disable_external(&self, profile: &RunnerProfile) -> Result<()>;

    /// Delete/unregister the external service definition itself.
    fn remove_external(&self, profile: &RunnerProfile) -> Result<()>;

    /// Resolve the service entry referencing `install_path`, if any.
    fn identity(&self, install_path: &Path) -> Result<Option<ServiceDescriptor>>;
}

/// The backend for the host OS.
pub fn host() -> Result<Arc<dyn ServiceControl>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::Launchd))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(linux::Systemd))
    }
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::SvcHelper))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        Err(Error::Unsupported(format!(
            "no service backend for {}",
            std::env::consts::OS
        )))
    }
}

const TRANSIENT_RETRIES: u32 = 2;

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    )
}

/// Run a service-manager command, retrying only transient spawn errors a
/// bounded number of times. Non-zero exit is a `Service` error.
pub(crate) fn run_checked(command: &mut Command, context: &str) -> Result<()> {
    let mut attempt = 0;
    loop {
        match command.status() {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => {
                return Err(Error::Service(format!("{context} failed with {status}")));
            }
            Err(err) if is_transient(&err) && attempt < TRANSIENT_RETRIES => {
                attempt += 1;
                debug!("{context}: transient error ({err}), retry {attempt}");
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(err) => return Err(Error::from_io(context, err)),
        }
    }
}

/// True when a systemd unit body's `ExecStart` references the given run
/// script. Kept platform-independent for testability.
#[allow(dead_code)]
pub(crate) fn unit_references_run_script(contents: &str, run_script: &str) -> bool {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .any(|(key, value)| key.trim() == "ExecStart" && value.contains(run_script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_start_match_requires_key() {
        let unit = "[Service]\nExecStart=/opt/runner/run.sh\n";
        assert!(unit_references_run_script(unit, "/opt/runner/run.sh"));
        assert!(!unit_references_run_script(unit, "/opt/other/run.sh"));
    }

    #[test]
    fn exec_start_comment_lines_do_not_match() {
        let unit = "# ExecStart was /opt/runner/run.sh\nDescription=x\n";
        assert!(!unit_references_run_script(unit, "/opt/runner/run.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn run_checked_surfaces_exit_failure() {
        let mut command = Command::new("false");
        let err = run_checked(&mut command, "false").expect_err("should fail");
        assert!(matches!(err, Error::Service(_)));
    }

    #[cfg(unix)]
    #[test]
    fn run_checked_accepts_success() {
        let mut command = Command::new("true");
        run_checked(&mut command, "true").expect("should pass");
    }
}
