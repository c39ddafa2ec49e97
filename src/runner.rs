// src/runner.rs

//! Foreground runner process control and diagnostic-log inspection
//!
//! The runner writes its own diagnostics under `<install>/_diag`. Verification
//! reads the tail of the newest file there for a ready marker; it never parses
//! full logs.

use crate::error::{Error, Result};
use crate::logging::scrub_sensitive;
use crate::paths::{expand_path, runner_logs_dir};
use crate::profile::RunnerProfile;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{error, info};

const LOG_TAIL_BYTES: usize = 1024 * 1024;

/// Substrings (matched case-insensitively) that mean the runner came online.
const READY_MARKERS: &[&str] = &["listening", "connected"];

/// Children spawned by this process, keyed by runner id.
#[derive(Default)]
pub struct ProcessTable {
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the runner's run script from its current install path, with
    /// stdout/stderr redirected into the engine's per-runner log dir.
    pub fn start(&self, profile: &RunnerProfile) -> Result<u32> {
        let install_path = expand_path(&profile.install.install_path);
        let script = run_script(&install_path)?;
        let log_dir = runner_logs_dir(&profile.runner_id)?;
        fs::create_dir_all(&log_dir)?;
        let stdout = File::create(log_dir.join("runner-stdout.log"))?;
        let stderr = File::create(log_dir.join("runner-stderr.log"))?;
        let child = Command::new(script)
            .current_dir(&install_path)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|err| Error::from_io("spawn runner", err))?;
        let pid = child.id();
        info!("runner {} started (pid {pid})", profile.runner_id);
        self.children
            .lock()
            .expect("process table mutex poisoned")
            .insert(profile.runner_id.clone(), child);
        Ok(pid)
    }

    /// Kill and reap the child for `runner_id` if one is tracked.
    pub fn stop(&self, runner_id: &str) {
        let mut guard = self.children.lock().expect("process table mutex poisoned");
        if let Some(mut child) = guard.remove(runner_id) {
            let _ = child.kill();
            let _ = child.wait();
            info!("runner {runner_id} stopped");
        }
    }

    /// True if a tracked child is still alive; reaps exited children.
    pub fn is_running(&self, runner_id: &str) -> bool {
        let mut guard = self.children.lock().expect("process table mutex poisoned");
        if let Some(child) = guard.get_mut(runner_id) {
            match child.try_wait() {
                Ok(Some(_)) => {
                    guard.remove(runner_id);
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    error!("runner {runner_id} process check failed: {err}");
                    false
                }
            }
        } else {
            false
        }
    }
}

pub fn run_script(install_path: &Path) -> Result<PathBuf> {
    let script = if cfg!(target_os = "windows") {
        install_path.join("run.cmd")
    } else {
        install_path.join("run.sh")
    };
    if !script.exists() {
        return Err(Error::NotFound(format!(
            "runner run script at {}",
            script.display()
        )));
    }
    Ok(script)
}

/// The runner's own diagnostic log directory.
pub fn diag_dir(profile: &RunnerProfile) -> PathBuf {
    expand_path(&profile.install.install_path).join("_diag")
}

/// Newest file in `log_dir` by mtime, if any.
pub fn latest_log_file(log_dir: &Path) -> Result<Option<PathBuf>> {
    if !log_dir.exists() {
        return Ok(None);
    }
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    entries.sort_by_key(|path| path.metadata().and_then(|m| m.modified()).ok());
    Ok(entries.last().cloned())
}

fn read_file_tail(path: &Path, max_bytes: usize) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(max_bytes as u64)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).to_string()))
}

/// Scan the tail of the newest diagnostic log for a ready marker.
pub fn has_ready_marker(log_dir: &Path) -> Result<bool> {
    let Some(path) = latest_log_file(log_dir)? else {
        return Ok(false);
    };
    let Some(content) = read_file_tail(&path, LOG_TAIL_BYTES)? else {
        return Ok(false);
    };
    for line in content.lines().rev().take(2000) {
        let line = scrub_sensitive(line).to_lowercase();
        if READY_MARKERS.iter().any(|marker| line.contains(marker)) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ready_marker_matches_case_insensitively() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("Runner_20240101.log"),
            "startup\nLISTENING for Jobs\n",
        )
        .expect("write log");
        assert!(has_ready_marker(dir.path()).expect("scan"));
    }

    #[test]
    fn connected_marker_is_accepted() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("Runner_20240101.log"),
            "Connected to server\n",
        )
        .expect("write log");
        assert!(has_ready_marker(dir.path()).expect("scan"));
    }

    #[test]
    fn no_marker_without_logs() {
        let dir = tempdir().expect("tempdir");
        assert!(!has_ready_marker(&dir.path().join("_diag")).expect("scan"));
    }

    #[test]
    fn no_marker_in_unrelated_lines() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("Runner_20240101.log"), "starting up\n").expect("write log");
        assert!(!has_ready_marker(dir.path()).expect("scan"));
    }

    #[test]
    fn latest_log_file_picks_newest() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("old.log"), "old").expect("write");
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("new.log"), "new").expect("write");
        let latest = latest_log_file(dir.path()).expect("scan").expect("some");
        assert!(latest.ends_with("new.log"));
    }
}
