// src/paths.rs

//! Host filesystem layout for managed data
//!
//! Everything the engine owns lives under one data root: moved runner
//! installs, per-runner log directories, and the profile store document.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "corral";

/// Engine data root, e.g. `~/.local/share/corral` on Linux.
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| Error::Unsupported("unable to resolve user data directory".into()))
}

/// Directory holding moved runner installs, one subdirectory per runner id.
pub fn managed_runners_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("runners"))
}

pub fn default_install_path(runner_id: &str) -> Result<PathBuf> {
    Ok(managed_runners_dir()?.join(runner_id))
}

pub fn runner_logs_dir(runner_id: &str) -> Result<PathBuf> {
    Ok(data_dir()?.join("logs").join(runner_id))
}

/// Path of the profile store document.
pub fn profiles_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("profiles.json"))
}

pub fn default_work_dir(runner_id: &str) -> PathBuf {
    let root = dirs::home_dir()
        .map(|home| home.join(".corral"))
        .unwrap_or_else(|| data_dir().unwrap_or_else(|_| PathBuf::from(".")));
    root.join("work").join(runner_id)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

/// True when `path` sits inside engine-controlled storage.
pub fn is_managed_path(path: &Path) -> bool {
    managed_runners_dir()
        .map(|managed| path.starts_with(managed))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_leaves_absolute_untouched() {
        assert_eq!(expand_path("/opt/runner"), PathBuf::from("/opt/runner"));
    }

    #[test]
    fn expand_path_resolves_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/runner"), home.join("runner"));
        }
    }

    #[test]
    fn default_install_path_is_under_managed_dir() {
        let path = default_install_path("abc").expect("path");
        assert!(is_managed_path(&path));
    }
}
