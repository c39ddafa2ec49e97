// src/engine/mod.rs

//! Adoption orchestrator
//!
//! `AdoptionEngine` owns the profile store, the service backend, and the
//! foreground process table, and sequences every state transition:
//!
//! ```text
//! Discovered -> Adopting -> AdoptedInPlace
//!                        -> Moved -> Verifying -> Verified -> (Deleted)
//!                                              -> Failed
//! ```
//!
//! Mutating operations on a runner are serialized through a per-runner async
//! mutex; adoption itself goes through a dedicated gate because no runner id
//! exists yet. Candidate snapshots can go stale, so "not already adopted" is
//! re-checked against the live store at adopt time, never at scan time.

mod adopt;
mod migrate;
mod rollback;
mod verify;

pub use adopt::{AdoptOptions, AdoptionStrategy};
pub use verify::{VerifyOptions, VerifyOutcome};

use crate::discovery::{self, DiscoveryCandidate};
use crate::error::{Error, Result};
use crate::profile::RunnerProfile;
use crate::runner::ProcessTable;
use crate::service::ServiceControl;
use crate::store::ProfileStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct AdoptionEngine {
    store: ProfileStore,
    service: Arc<dyn ServiceControl>,
    processes: ProcessTable,
    scan_roots: Vec<PathBuf>,
    candidates: StdMutex<HashMap<String, DiscoveryCandidate>>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    adopt_gate: AsyncMutex<()>,
}

impl AdoptionEngine {
    pub fn new(store: ProfileStore, service: Arc<dyn ServiceControl>) -> Self {
        Self {
            store,
            service,
            processes: ProcessTable::new(),
            scan_roots: discovery::default_scan_roots(),
            candidates: StdMutex::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            adopt_gate: AsyncMutex::new(()),
        }
    }

    /// Engine over the host service backend and default store location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(ProfileStore::open_default()?, crate::service::host()?))
    }

    /// Override the scan roots (tests, or a user-configured search path).
    pub fn with_scan_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.scan_roots = roots;
        self
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// Fresh scan of the search roots. Replaces the candidate snapshot used
    /// by id-based adoption.
    pub fn scan(&self) -> Vec<DiscoveryCandidate> {
        let found = discovery::scan(&self.store.get(), self.service.as_ref(), &self.scan_roots);
        let mut cache = self.candidates.lock().expect("candidate mutex poisoned");
        cache.clear();
        for candidate in &found {
            cache.insert(candidate.candidate_id.clone(), candidate.clone());
        }
        found
    }

    pub fn list(&self) -> Vec<RunnerProfile> {
        self.store.get().runners
    }

    pub fn profile(&self, runner_id: &str) -> Result<RunnerProfile> {
        self.store.find_runner(runner_id)
    }

    pub(crate) fn candidate(&self, candidate_id: &str) -> Result<DiscoveryCandidate> {
        self.candidates
            .lock()
            .expect("candidate mutex poisoned")
            .get(candidate_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("candidate {candidate_id}")))
    }

    /// Toggle run-on-boot for a managed service. Externally-owned services
    /// can only be changed through `replace_service`.
    pub async fn set_run_on_boot(&self, runner_id: &str, enabled: bool) -> Result<RunnerProfile> {
        let _guard = self.runner_guard(runner_id).await;
        let profile = self.store.find_runner(runner_id)?;
        if profile.service.provider == crate::profile::ServiceProvider::External {
            return Err(Error::Conflict(
                "service is externally owned; replace it before changing boot behavior".into(),
            ));
        }
        self.service.enable_on_boot(&profile, enabled)?;
        self.store
            .update_runner(runner_id, |runner| runner.service.run_on_boot = enabled)
    }

    /// At most one mutating operation in flight per runner id.
    pub(crate) async fn runner_guard(&self, runner_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().expect("lock map mutex poisoned");
            map.entry(runner_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub(crate) async fn adopt_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.adopt_gate.lock().await
    }
}
