// src/service/macos.rs

//! launchd backend
//!
//! Managed runners get a LaunchAgent plist labeled
//! `com.corral.runner.<id>`. Identity resolution parses candidate plists and
//! requires the declared `Label` plus a `Program`/`ProgramArguments` entry
//! matching the install's run script; the file name is never trusted.

use super::{run_checked, ServiceControl, ServiceDescriptor, ServiceStatus};
use crate::error::{Error, Result};
use crate::paths::expand_path;
use crate::profile::{RunnerProfile, ServiceProvider};
use plist::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

pub struct Launchd;

impl ServiceControl for Launchd {
    fn install(&self, profile: &RunnerProfile) -> Result<()> {
        let plist_path = plist_path(&profile.runner_id)?;
        let log_dir = crate::paths::runner_logs_dir(&profile.runner_id)?;
        fs::create_dir_all(&log_dir)?;
        fs::write(&plist_path, plist_content(profile, &log_dir))?;
        let _ = bootout(&profile.runner_id);
        let scope = user_scope()?;
        let plist = plist_path.to_string_lossy();
        launchctl(&["bootstrap", &scope, plist.as_ref()], "bootstrap")
    }

    fn uninstall(&self, profile: &RunnerProfile) -> Result<()> {
        let plist_path = plist_path(&profile.runner_id)?;
        let _ = bootout(&profile.runner_id);
        if plist_path.exists() {
            fs::remove_file(plist_path)?;
        }
        Ok(())
    }

    fn enable_on_boot(&self, profile: &RunnerProfile, enabled: bool) -> Result<()> {
        let scope = label_scope(&label_for(&profile.runner_id))?;
        launchctl(
            &[if enabled { "enable" } else { "disable" }, &scope],
            "enable/disable",
        )
    }

    fn start(&self, profile: &RunnerProfile) -> Result<()> {
        let scope = label_scope(&label_for(&profile.runner_id))?;
        launchctl(&["kickstart", "-k", &scope], "kickstart")
    }

    fn stop(&self, profile: &RunnerProfile) -> Result<()> {
        let scope = label_scope(&label_for(&profile.runner_id))?;
        launchctl(&["stop", &scope], "stop")
    }

    fn status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        if profile.service.provider == ServiceProvider::External {
            return self.external_status(profile);
        }
        let scope = label_scope(&label_for(&profile.runner_id))?;
        Ok(print_status(&scope, plist_path(&profile.runner_id)?.exists()))
    }

    fn external_status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        let installed = external_plist_path(profile)
            .map(|path| path.exists())
            .unwrap_or(false);
        let label = match external_label(profile) {
            Ok(label) => label,
            Err(err) => {
                warn!("missing external launchd label: {err}");
                return Ok(ServiceStatus {
                    installed,
                    running: false,
                    enabled: installed,
                });
            }
        };
        let scope = label_scope(&label)?;
        Ok(print_status(&scope, installed))
    }

    fn disable_external(&self, profile: &RunnerProfile) -> Result<()> {
        let scope = label_scope(&external_label(profile)?)?;
        launchctl(&["bootout", &scope], "bootout")
    }

    fn remove_external(&self, profile: &RunnerProfile) -> Result<()> {
        let _ = self.disable_external(profile);
        if let Some(path) = external_plist_path(profile)
            && path.exists()
        {
            fs::remove_file(path).map_err(|err| Error::from_io("remove plist", err))?;
        }
        Ok(())
    }

    fn identity(&self, install_path: &Path) -> Result<Option<ServiceDescriptor>> {
        let run_script = install_path.join("run.sh").to_string_lossy().to_string();
        for dir in agent_search_dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("plist") {
                    continue;
                }
                if let Some(label) = label_for_run_script(&path, &run_script) {
                    let provider = if label.starts_with("com.corral.runner.") {
                        ServiceProvider::Corral
                    } else {
                        ServiceProvider::External
                    };
                    return Ok(Some(ServiceDescriptor {
                        provider,
                        id: Some(label),
                        path: Some(path.to_string_lossy().to_string()),
                    }));
                }
            }
        }
        Ok(None)
    }
}

fn agent_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join("Library").join("LaunchAgents"));
    }
    dirs.push(PathBuf::from("/Library/LaunchAgents"));
    dirs.push(PathBuf::from("/Library/LaunchDaemons"));
    dirs
}

/// Declared label of the plist at `path` if its program (arguments) reference
/// the given run script.
fn label_for_run_script(path: &Path, run_script: &str) -> Option<String> {
    let plist = Value::from_file(path).ok()?;
    let dict = plist.as_dictionary()?;
    let label = dict
        .get("Label")
        .and_then(|value| value.as_string())
        .map(|value| value.to_string())?;
    let program = dict
        .get("Program")
        .and_then(|value| value.as_string())
        .map(|value| value.to_string());
    let program_args = dict
        .get("ProgramArguments")
        .and_then(|value| value.as_array())
        .map(|array| {
            array
                .iter()
                .filter_map(|item| item.as_string().map(|val| val.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let matches =
        program.as_deref() == Some(run_script) || program_args.iter().any(|arg| arg == run_script);
    matches.then_some(label)
}

fn plist_content(profile: &RunnerProfile, log_dir: &Path) -> String {
    let install_path = expand_path(&profile.install.install_path);
    let run_script = install_path.join("run.sh");
    let stdout = log_dir.join("runner-stdout.log");
    let stderr = log_dir.join("runner-stderr.log");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{script}</string>
  </array>
  <key>WorkingDirectory</key>
  <string>{workdir}</string>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
        label = label_for(&profile.runner_id),
        script = run_script.to_string_lossy(),
        workdir = install_path.to_string_lossy(),
        stdout = stdout.to_string_lossy(),
        stderr = stderr.to_string_lossy(),
    )
}

fn label_for(runner_id: &str) -> String {
    format!("com.corral.runner.{runner_id}")
}

fn plist_path(runner_id: &str) -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| Error::Service("unable to resolve user home".into()))?;
    Ok(home
        .join("Library")
        .join("LaunchAgents")
        .join(format!("{}.plist", label_for(runner_id))))
}

fn external_plist_path(profile: &RunnerProfile) -> Option<PathBuf> {
    profile.service.external_path.as_ref().map(PathBuf::from)
}

fn external_label(profile: &RunnerProfile) -> Result<String> {
    if let Some(label) = profile.service.external_id.clone() {
        return Ok(label);
    }
    if let Some(path) = external_plist_path(profile)
        && let Some(label) = declared_label(&path)
    {
        return Ok(label);
    }
    Err(Error::Service("missing external launchd label".into()))
}

fn declared_label(path: &Path) -> Option<String> {
    let plist = Value::from_file(path).ok()?;
    plist
        .as_dictionary()?
        .get("Label")
        .and_then(|value| value.as_string())
        .map(|value| value.to_string())
}

fn label_scope(label: &str) -> Result<String> {
    Ok(format!("gui/{}/{label}", user_uid()?))
}

fn user_scope() -> Result<String> {
    Ok(format!("gui/{}", user_uid()?))
}

fn user_uid() -> Result<String> {
    let output = Command::new("id").arg("-u").output()?;
    if !output.status.success() {
        return Err(Error::Service("failed to read uid".into()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn print_status(scope: &str, installed: bool) -> ServiceStatus {
    let output = Command::new("launchctl").arg("print").arg(scope).output();
    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            ServiceStatus {
                installed: true,
                running: stdout.contains("state = running") || stdout.contains("pid ="),
                enabled: !stdout.contains("disabled = true"),
            }
        }
        _ => ServiceStatus {
            installed,
            running: false,
            enabled: installed,
        },
    }
}

fn launchctl(args: &[&str], context: &str) -> Result<()> {
    run_checked(
        Command::new("launchctl").args(args),
        &format!("launchctl {context}"),
    )
}

fn bootout(runner_id: &str) -> Result<()> {
    let scope = label_scope(&label_for(runner_id))?;
    launchctl(&["bootout", &scope], "bootout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{
        now_iso8601, InstallMode, InstallRecord, MigrationStatus, ServiceRecord,
    };
    use tempfile::tempdir;

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
    fn plist_contains_label_and_script() {
        let plist = plist_content(&profile(), Path::new("/tmp/logs"));
        assert!(plist.contains("com.corral.runner.abc"));
        assert!(plist.contains("/tmp/runner/run.sh"));
    }

    #[test]
    fn label_resolution_ignores_file_name() {
        let dir = tempdir().expect("tempdir");
        let plist_file = dir.path().join("totally-unrelated-name.plist");
        let run_script = "/Users/test/actions-runner/run.sh";
        let plist = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>com.example.runner</string>
  <key>ProgramArguments</key>
  <array>
    <string>{run_script}</string>
  </array>
</dict>
</plist>
"#
        );
        fs::write(&plist_file, plist).expect("write plist");
        let label = label_for_run_script(&plist_file, run_script);
        assert_eq!(label.as_deref(), Some("com.example.runner"));
        assert_eq!(
            label_for_run_script(&plist_file, "/some/other/run.sh"),
            None
        );
    }
}
