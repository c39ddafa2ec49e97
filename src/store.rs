// src/store.rs

//! Durable, single-writer store of runner profiles
//!
//! The registry is a single JSON document. One `ProfileStore` owns it for the
//! lifetime of the process: an advisory file lock (fs2) rejects a second
//! writer, and an in-process mutex serializes mutation. Partial-failure
//! migration states (`moved` but not `verified`) are first-class persisted
//! data, so a restart mid-migration resumes from the document.

use crate::error::{Error, Result};
use crate::profile::RunnerProfile;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Registry {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub runners: Vec<RunnerProfile>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            runners: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    // Held for the store's lifetime; dropping releases the advisory lock.
    _lock: File,
    inner: Mutex<Registry>,
}

impl ProfileStore {
    /// Open (or create) the registry at `path`, taking the writer lock.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        let lock = File::create(&lock_path)?;
        lock.try_lock_exclusive().map_err(|err| {
            Error::Conflict(format!(
                "profile store already in use ({}): {err}",
                lock_path.display()
            ))
        })?;

        let registry = if path.exists() {
            let data = fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            Registry::default()
        };
        debug!(
            "profile store opened with {} runner(s) at {}",
            registry.runners.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
            inner: Mutex::new(registry),
        })
    }

    /// Open the store at its default host location.
    pub fn open_default() -> Result<Self> {
        Self::open(&crate::paths::profiles_path()?)
    }

    /// Snapshot of the current registry.
    pub fn get(&self) -> Registry {
        self.inner.lock().expect("store mutex poisoned").clone()
    }

    pub fn find_runner(&self, runner_id: &str) -> Result<RunnerProfile> {
        self.get()
            .runners
            .iter()
            .find(|runner| runner.runner_id == runner_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("runner {runner_id}")))
    }

    /// Apply a mutation and persist the whole document before returning.
    pub fn update<F>(&self, updater: F) -> Result<Registry>
    where
        F: FnOnce(&mut Registry),
    {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        updater(&mut guard);
        self.save_locked(&guard)?;
        Ok(guard.clone())
    }

    /// Mutate a single profile; `NotFound` if the id is unknown.
    pub fn update_runner<F>(&self, runner_id: &str, updater: F) -> Result<RunnerProfile>
    where
        F: FnOnce(&mut RunnerProfile),
    {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let runner = guard
            .runners
            .iter_mut()
            .find(|runner| runner.runner_id == runner_id)
            .ok_or_else(|| Error::NotFound(format!("runner {runner_id}")))?;
        updater(runner);
        let updated = runner.clone();
        self.save_locked(&guard)?;
        Ok(updated)
    }

    pub fn remove_runner(&self, runner_id: &str) -> Result<()> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let before = guard.runners.len();
        guard.runners.retain(|runner| runner.runner_id != runner_id);
        if guard.runners.len() == before {
            return Err(Error::NotFound(format!("runner {runner_id}")));
        }
        self.save_locked(&guard)
    }

    fn save_locked(&self, registry: &Registry) -> Result<()> {
        let data = serde_json::to_string_pretty(registry)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{
        new_runner_id, now_iso8601, InstallMode, InstallRecord, MigrationStatus, RunnerProfile,
        ServiceRecord,
    };
    use tempfile::tempdir;

    fn profile(install_path: &str) -> RunnerProfile {
        RunnerProfile {
            runner_id: new_runner_id(),
            display_name: "Test".to_string(),
            runner_name: "runner".to_string(),
            scope: None,
            labels: vec!["self-hosted".to_string()],
            work_dir: "/tmp/work".to_string(),
            install: InstallRecord {
                mode: InstallMode::Adopted,
                install_path: install_path.to_string(),
                adopted_from_path: None,
                migration_status: MigrationStatus::None,
            },
            service: ServiceRecord::default(),
            created_at: now_iso8601(),
            last_seen_at: None,
        }
    }

    #[test]
    fn open_creates_empty_registry() {
        let dir = tempdir().expect("tempdir");
        let store = ProfileStore::open(&dir.path().join("profiles.json")).expect("open");
        assert!(store.get().runners.is_empty());
        assert_eq!(store.get().schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn update_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        let runner_id;
        {
            let store = ProfileStore::open(&path).expect("open");
            let added = profile("/tmp/runner-a");
            runner_id = added.runner_id.clone();
            store
                .update(|registry| registry.runners.push(added))
                .expect("update");
        }
        let store = ProfileStore::open(&path).expect("reopen");
        let found = store.find_runner(&runner_id).expect("find");
        assert_eq!(found.install.install_path, "/tmp/runner-a");
    }

    #[test]
    fn update_runner_unknown_id_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = ProfileStore::open(&dir.path().join("profiles.json")).expect("open");
        let err = store
            .update_runner("missing", |_| {})
            .expect_err("should fail");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn second_writer_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        let _store = ProfileStore::open(&path).expect("open");
        let err = ProfileStore::open(&path).expect_err("second open should fail");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn remove_runner_deletes_record() {
        let dir = tempdir().expect("tempdir");
        let store = ProfileStore::open(&dir.path().join("profiles.json")).expect("open");
        let added = profile("/tmp/runner-b");
        let runner_id = added.runner_id.clone();
        store
            .update(|registry| registry.runners.push(added))
            .expect("update");
        store.remove_runner(&runner_id).expect("remove");
        assert!(matches!(
            store.find_runner(&runner_id),
            Err(Error::NotFound(_))
        ));
    }
}
