// src/service/windows.rs

//! Windows backend via the runner's `svc.cmd` helper
//!
//! The helper script hides the real Windows service name, so identity
//! resolution is best-effort: a descriptor with a null `id` and the install
//! path. Destructive actions keyed off a null id are gated by the engine on
//! explicit path confirmation.

use super::{run_checked, ServiceControl, ServiceDescriptor, ServiceStatus};
use crate::error::Result;
use crate::paths::expand_path;
use crate::profile::{RunnerProfile, ServiceProvider};
use std::path::Path;
use std::process::Command;

pub struct SvcHelper;

fn svc_command(install_path: &Path, action: &str) -> Command {
    let mut command = Command::new("cmd");
    command
        .arg("/C")
        .arg("svc.cmd")
        .arg(action)
        .current_dir(install_path);
    command
}

fn svc_run(profile: &RunnerProfile, action: &str) -> Result<()> {
    let install_path = expand_path(&profile.install.install_path);
    run_checked(
        &mut svc_command(&install_path, action),
        &format!("svc.cmd {action}"),
    )
}

fn svc_status(profile: &RunnerProfile) -> ServiceStatus {
    let install_path = expand_path(&profile.install.install_path);
    match svc_command(&install_path, "status").output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
            ServiceStatus {
                installed: true,
                running: stdout.contains("running"),
                enabled: true,
            }
        }
        _ => ServiceStatus::default(),
    }
}

impl ServiceControl for SvcHelper {
    fn install(&self, profile: &RunnerProfile) -> Result<()> {
        svc_run(profile, "install")?;
        svc_run(profile, "start")
    }

    fn uninstall(&self, profile: &RunnerProfile) -> Result<()> {
        let _ = svc_run(profile, "stop");
        svc_run(profile, "uninstall")
    }

    fn enable_on_boot(&self, _profile: &RunnerProfile, _enabled: bool) -> Result<()> {
        // svc.cmd services are always boot-enabled while installed.
        Ok(())
    }

    fn start(&self, profile: &RunnerProfile) -> Result<()> {
        svc_run(profile, "start")
    }

    fn stop(&self, profile: &RunnerProfile) -> Result<()> {
        svc_run(profile, "stop")
    }

    fn status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        Ok(svc_status(profile))
    }

    fn external_status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        Ok(svc_status(profile))
    }

    fn disable_external(&self, profile: &RunnerProfile) -> Result<()> {
        let _ = svc_run(profile, "stop");
        Ok(())
    }

    fn remove_external(&self, profile: &RunnerProfile) -> Result<()> {
        let _ = svc_run(profile, "stop");
        svc_run(profile, "uninstall")
    }

    fn identity(&self, install_path: &Path) -> Result<Option<ServiceDescriptor>> {
        if !install_path.join("svc.cmd").exists() {
            return Ok(None);
        }
        match svc_command(install_path, "status").output() {
            Ok(output) if output.status.success() => Ok(Some(ServiceDescriptor {
                provider: ServiceProvider::External,
                id: None,
                path: Some(install_path.to_string_lossy().to_string()),
            })),
            _ => Ok(None),
        }
    }
}
