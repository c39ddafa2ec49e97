// src/service/linux.rs

//! systemd user-unit backend
//!
//! Managed runners get a `corral-runner-<id>.service` user unit. Identity
//! resolution scans user and system unit directories and matches the unit's
//! declared `ExecStart` against the install's run script.

use super::{run_checked, unit_references_run_script, ServiceControl, ServiceDescriptor, ServiceStatus};
use crate::error::{Error, Result};
use crate::paths::expand_path;
use crate::profile::{RunnerProfile, ServiceProvider};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct Systemd;

impl ServiceControl for Systemd {
    fn install(&self, profile: &RunnerProfile) -> Result<()> {
        let unit_path = unit_path(&profile.runner_id)?;
        if let Some(parent) = unit_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&unit_path, unit_content(profile))?;
        systemctl(&["--user", "daemon-reload"])?;
        systemctl(&["--user", "enable", &unit_name(&profile.runner_id)])?;
        systemctl(&["--user", "start", &unit_name(&profile.runner_id)])?;
        Ok(())
    }

    fn uninstall(&self, profile: &RunnerProfile) -> Result<()> {
        let unit_path = unit_path(&profile.runner_id)?;
        let unit = unit_name(&profile.runner_id);
        let _ = systemctl(&["--user", "stop", &unit]);
        let _ = systemctl(&["--user", "disable", &unit]);
        if unit_path.exists() {
            fs::remove_file(unit_path)?;
        }
        systemctl(&["--user", "daemon-reload"])
    }

    fn enable_on_boot(&self, profile: &RunnerProfile, enabled: bool) -> Result<()> {
        let unit = unit_name(&profile.runner_id);
        if enabled {
            systemctl(&["--user", "enable", &unit])
        } else {
            systemctl(&["--user", "disable", &unit])
        }
    }

    fn start(&self, profile: &RunnerProfile) -> Result<()> {
        systemctl(&["--user", "start", &unit_name(&profile.runner_id)])
    }

    fn stop(&self, profile: &RunnerProfile) -> Result<()> {
        systemctl(&["--user", "stop", &unit_name(&profile.runner_id)])
    }

    fn status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        if profile.service.provider == ServiceProvider::External {
            return self.external_status(profile);
        }
        let unit = unit_name(&profile.runner_id);
        Ok(ServiceStatus {
            installed: unit_path(&profile.runner_id)?.exists(),
            running: systemctl_check(&["--user", "is-active", &unit]),
            enabled: systemctl_check(&["--user", "is-enabled", &unit]),
        })
    }

    fn external_status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        let unit = external_unit_name(profile)?;
        let installed = external_unit_path(profile)
            .map(|path| path.exists())
            .unwrap_or(false);
        Ok(ServiceStatus {
            installed,
            running: systemctl_check(&["--user", "is-active", &unit]),
            enabled: systemctl_check(&["--user", "is-enabled", &unit]),
        })
    }

    fn disable_external(&self, profile: &RunnerProfile) -> Result<()> {
        let unit = external_unit_name(profile)?;
        let _ = systemctl(&["--user", "stop", &unit]);
        systemctl(&["--user", "disable", &unit])
    }

    fn remove_external(&self, profile: &RunnerProfile) -> Result<()> {
        let _ = self.disable_external(profile);
        if let Some(path) = external_unit_path(profile)
            && path.exists()
        {
            fs::remove_file(path).map_err(|err| Error::from_io("remove unit file", err))?;
        }
        systemctl(&["--user", "daemon-reload"])
    }

    fn identity(&self, install_path: &Path) -> Result<Option<ServiceDescriptor>> {
        let run_script = install_path.join("run.sh").to_string_lossy().to_string();
        for dir in unit_search_dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("service") {
                    continue;
                }
                let contents = fs::read_to_string(&path).unwrap_or_default();
                if unit_references_run_script(&contents, &run_script) {
                    let unit = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map(|name| name.to_string());
                    let provider = if unit
                        .as_deref()
                        .map(|name| name.starts_with("corral-runner-"))
                        .unwrap_or(false)
                    {
                        ServiceProvider::Corral
                    } else {
                        ServiceProvider::External
                    };
                    return Ok(Some(ServiceDescriptor {
                        provider,
                        id: unit,
                        path: Some(path.to_string_lossy().to_string()),
                    }));
                }
            }
        }
        Ok(None)
    }
}

fn unit_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".config").join("systemd").join("user"));
    }
    dirs.push(PathBuf::from("/etc/systemd/system"));
    dirs
}

fn unit_name(runner_id: &str) -> String {
    format!("corral-runner-{runner_id}.service")
}

fn unit_path(runner_id: &str) -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| Error::Service("unable to resolve user home".into()))?;
    Ok(home
        .join(".config")
        .join("systemd")
        .join("user")
        .join(unit_name(runner_id)))
}

fn unit_content(profile: &RunnerProfile) -> String {
    let install_path = expand_path(&profile.install.install_path);
    let run_script = install_path.join("run.sh");
    format!(
        r#"[Unit]
Description=Corral CI Runner ({runner_id})
After=network.target

[Service]
Type=simple
WorkingDirectory={install_path}
ExecStart={run_script}
Restart=always
RestartSec=5

[Install]
WantedBy=default.target
"#,
        runner_id = profile.runner_id,
        install_path = install_path.to_string_lossy(),
        run_script = run_script.to_string_lossy()
    )
}

fn external_unit_name(profile: &RunnerProfile) -> Result<String> {
    if let Some(unit) = profile.service.external_id.clone() {
        return Ok(unit);
    }
    if let Some(path) = external_unit_path(profile)
        && let Some(name) = path.file_name().and_then(|name| name.to_str())
    {
        return Ok(name.to_string());
    }
    Err(Error::Service("missing external systemd unit".into()))
}

fn external_unit_path(profile: &RunnerProfile) -> Option<PathBuf> {
    profile.service.external_path.as_ref().map(PathBuf::from)
}

fn systemctl(args: &[&str]) -> Result<()> {
    run_checked(
        Command::new("systemctl").args(args),
        &format!("systemctl {}", args.join(" ")),
    )
}

fn systemctl_check(args: &[&str]) -> bool {
    Command::new("systemctl")
        .args(args)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{
        now_iso8601, InstallMode, InstallRecord, MigrationStatus, ServiceRecord,
    };

    fn profile() -> RunnerProfile {
        RunnerProfile {
            runner_id: "abc".to_string(),
            display_name: "Test".to_string(),
            runner_name: "runner".to_string(),
            scope: None,
            labels: vec!["self-hosted".to_string()],
            work_dir: "/tmp".to_string(),
            install: InstallRecord {
                mode: InstallMode::Managed,
                install_path: "/tmp/runner".to_string(),
                adopted_from_path: None,
                migration_status: MigrationStatus::None,
            },
            service: ServiceRecord::default(),
            created_at: now_iso8601(),
            last_seen_at: None,
        }
    }

    #[test]
    fn unit_contains_exec_start_and_name() {
        let unit = unit_content(&profile());
        assert!(unit.contains("ExecStart=/tmp/runner/run.sh"));
        assert!(unit.contains("WorkingDirectory=/tmp/runner"));
        assert_eq!(unit_name("abc"), "corral-runner-abc.service");
    }

    #[test]
    fn external_unit_name_falls_back_to_path() {
        let mut profile = profile();
        profile.service.external_path =
            Some("/etc/systemd/system/gh-runner.service".to_string());
        assert_eq!(
            external_unit_name(&profile).expect("unit"),
            "gh-runner.service"
        );
    }
}
