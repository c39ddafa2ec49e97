// src/discovery.rs

//! Candidate scanner
//!
//! Walks fixed, OS-specific search roots for directories that look like
//! runner installs, parses what metadata it can, and asks the service backend
//! whether an OS service already references each install. Every scan produces
//! a fresh candidate list; nothing here is cached or persisted. A malformed
//! install never aborts the scan, it is skipped with a logged reason.

use crate::profile::{new_runner_id, RunnerScope};
use crate::runner::latest_log_file;
use crate::service::ServiceControl;
use crate::store::Registry;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory-name prefixes that mark a likely runner install.
const SCAN_PREFIXES: &[&str] = &["actions-runner", "runner"];

/// A filesystem-discovered, not-yet-managed runner installation.
#[derive(Debug, Serialize, Clone)]
pub struct DiscoveryCandidate {
    pub candidate_id: String,
    pub install_path: String,
    pub runner_name: Option<String>,
    pub labels: Vec<String>,
    pub scope: Option<RunnerScope>,
    pub work_dir: Option<String>,
    pub service_present: bool,
    pub service_id: Option<String>,
    pub service_path: Option<String>,
    pub last_log_time: Option<String>,
}

/// Fixed search roots for the host: managed storage, home, and Downloads.
pub fn default_scan_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(managed) = crate::paths::managed_runners_dir()
        && managed.exists()
    {
        roots.push(managed);
    }
    if let Some(home) = dirs::home_dir() {
        roots.push(home.clone());
        roots.push(home.join("Downloads"));
    }
    roots
}

/// Scan `roots` for adoptable runner installs. Paths already bound to a
/// profile in `registry` are skipped; so are unreadable or malformed installs.
pub fn scan(
    registry: &Registry,
    service: &dyn ServiceControl,
    roots: &[PathBuf],
) -> Vec<DiscoveryCandidate> {
    let owned: HashSet<PathBuf> = registry
        .runners
        .iter()
        .map(|runner| PathBuf::from(&runner.install.install_path))
        .collect();

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for root in roots {
        for path in candidate_dirs(root) {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !seen.insert(canonical.clone()) {
                continue;
            }
            if !looks_like_runner_install(&canonical) {
                continue;
            }
            if owned.contains(&canonical) || owned.contains(&path) {
                debug!("scan: {} already adopted, skipping", canonical.display());
                continue;
            }
            let metadata = parse_runner_metadata(&canonical);
            let descriptor = match service.identity(&canonical) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    debug!(
                        "scan: service identity failed for {}: {err}",
                        canonical.display()
                    );
                    None
                }
            };
            let (service_present, service_id, service_path) = match descriptor {
                Some(descriptor) => (true, descriptor.id, descriptor.path),
                None => (false, None, None),
            };
            candidates.push(DiscoveryCandidate {
                candidate_id: new_runner_id(),
                install_path: canonical.to_string_lossy().to_string(),
                runner_name: metadata.runner_name,
                labels: metadata.labels,
                scope: metadata.scope,
                work_dir: metadata.work_dir,
                service_present,
                service_id,
                service_path,
                last_log_time: last_log_timestamp(&canonical),
            });
        }
    }
    candidates
}

/// Immediate subdirectories of `root` whose names match a runner prefix,
/// plus `root` itself when the root is managed storage.
fn candidate_dirs(root: &Path) -> Vec<PathBuf> {
    let managed_root = crate::paths::is_managed_path(root);
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| {
            if managed_root {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            SCAN_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Heuristic for "this directory holds a runner install".
pub fn looks_like_runner_install(path: &Path) -> bool {
    let has_scripts = if cfg!(target_os = "windows") {
        path.join("config.cmd").exists() && path.join("run.cmd").exists()
    } else {
        path.join("config.sh").exists() && path.join("run.sh").exists()
    };
    let has_markers = path.join(".runner").exists() || path.join("_diag").exists();
    has_scripts || has_markers
}

#[derive(Debug, Default)]
pub(crate) struct RunnerMetadata {
    pub runner_name: Option<String>,
    pub labels: Vec<String>,
    pub scope: Option<RunnerScope>,
    pub work_dir: Option<String>,
}

/// Parse `.runner` metadata, tolerating the schema variants different runner
/// versions write: alternate key names, labels as strings or objects.
pub(crate) fn parse_runner_metadata(path: &Path) -> RunnerMetadata {
    let runner_file = path.join(".runner");
    let data = match fs::read_to_string(&runner_file) {
        Ok(data) => data,
        Err(err) => {
            debug!("scan: no readable .runner at {}: {err}", path.display());
            return RunnerMetadata::default();
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(err) => {
            debug!("scan: malformed .runner at {}: {err}", path.display());
            return RunnerMetadata::default();
        }
    };
    let str_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| value.get(*key).and_then(|val| val.as_str()))
            .map(|val| val.to_string())
    };
    let runner_name = str_field(&["name", "agentName", "runnerName"]);
    let labels = value
        .get("labels")
        .and_then(|val| val.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    if let Some(label) = item.as_str() {
                        return Some(label.to_string());
                    }
                    item.get("name")
                        .and_then(|name| name.as_str())
                        .map(|name| name.to_string())
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let scope = str_field(&["serverUrl", "gitHubUrl", "githubUrl", "url"])
        .and_then(|url| scope_from_url(&url));
    let work_dir = str_field(&["workFolder", "workDir", "workDirectory"])
        .map(|folder| resolve_work_dir(path, &folder));
    RunnerMetadata {
        runner_name,
        labels,
        scope,
        work_dir,
    }
}

fn resolve_work_dir(install_path: &Path, work_folder: &str) -> String {
    if Path::new(work_folder).is_absolute() {
        return work_folder.to_string();
    }
    install_path.join(work_folder).to_string_lossy().to_string()
}

/// Infer repo/org/enterprise scope from a runner server URL.
pub fn scope_from_url(url: &str) -> Option<RunnerScope> {
    let trimmed = url.trim_end_matches('/');
    let path = if let Some(index) = trimmed.find("//") {
        trimmed[index + 2..].splitn(2, '/').nth(1).unwrap_or("")
    } else {
        trimmed
    };
    let segments: Vec<&str> = path.split('/').filter(|seg| !seg.is_empty()).collect();
    match segments.as_slice() {
        ["enterprises", enterprise, ..] => Some(RunnerScope::Enterprise {
            enterprise: (*enterprise).to_string(),
        }),
        [owner, repo, ..] => Some(RunnerScope::Repo {
            owner: (*owner).to_string(),
            repo: (*repo).to_string(),
        }),
        [org] => Some(RunnerScope::Org {
            org: (*org).to_string(),
        }),
        [] => None,
    }
}

fn last_log_timestamp(install_path: &Path) -> Option<String> {
    let latest = latest_log_file(&install_path.join("_diag")).ok().flatten()?;
    let modified = fs::metadata(latest).ok()?.modified().ok()?;
    let timestamp: DateTime<Utc> = modified.into();
    Some(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
}
