// tests/common/mod.rs

//! Shared test utilities: a scriptable service backend and install fixtures.

use corral::{
    AdoptionEngine, InstallMode, InstallRecord, MigrationStatus, ProfileStore, Result,
    RunnerProfile, ServiceControl, ServiceDescriptor, ServiceProvider, ServiceRecord,
    ServiceStatus,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tempfile::TempDir;

/// In-memory service backend. `identities` maps install paths to the service
/// entries that claim them; `healthy` controls whether a started runner ever
/// writes its ready marker.
#[derive(Default)]
pub struct MockService {
    identities: Mutex<HashMap<PathBuf, ServiceDescriptor>>,
    installed: Mutex<HashSet<String>>,
    running: Mutex<HashSet<String>>,
    healthy: AtomicBool,
    hold_disable: Mutex<Option<mpsc::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        let service = Self::default();
        service.healthy.store(true, Ordering::SeqCst);
        Arc::new(service)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Register an external service entry claiming `install_path`.
    pub fn add_identity(&self, install_path: &Path, id: Option<&str>, service_path: &str) {
        let key = canonical(install_path);
        self.identities.lock().unwrap().insert(
            key,
            ServiceDescriptor {
                provider: ServiceProvider::External,
                id: id.map(|id| id.to_string()),
                path: Some(service_path.to_string()),
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Make the next `disable_external` call block until the returned sender
    /// fires, so tests can hold an operation open mid-flight.
    pub fn gate_disable_external(&self) -> mpsc::Sender<()> {
        let (sender, receiver) = mpsc::channel();
        *self.hold_disable.lock().unwrap() = Some(receiver);
        sender
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn drop_identity_at(&self, service_path: Option<&str>) {
        if let Some(service_path) = service_path {
            self.identities
                .lock()
                .unwrap()
                .retain(|_, descriptor| descriptor.path.as_deref() != Some(service_path));
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

impl ServiceControl for MockService {
    fn install(&self, profile: &RunnerProfile) -> Result<()> {
        self.record(&format!("install {}", profile.install.install_path));
        self.installed
            .lock()
            .unwrap()
            .insert(profile.runner_id.clone());
        Ok(())
    }

    fn uninstall(&self, profile: &RunnerProfile) -> Result<()> {
        self.record("uninstall");
        self.installed.lock().unwrap().remove(&profile.runner_id);
        self.running.lock().unwrap().remove(&profile.runner_id);
        Ok(())
    }

    fn enable_on_boot(&self, _profile: &RunnerProfile, enabled: bool) -> Result<()> {
        self.record(&format!("enable_on_boot {enabled}"));
        Ok(())
    }

    fn start(&self, profile: &RunnerProfile) -> Result<()> {
        self.record("start");
        self.running
            .lock()
            .unwrap()
            .insert(profile.runner_id.clone());
        if self.healthy.load(Ordering::SeqCst) {
            let diag = Path::new(&profile.install.install_path).join("_diag");
            fs::create_dir_all(&diag).unwrap();
            fs::write(diag.join("Runner_test.log"), "Listening for Jobs\n").unwrap();
        }
        Ok(())
    }

    fn stop(&self, profile: &RunnerProfile) -> Result<()> {
        self.record("stop");
        self.running.lock().unwrap().remove(&profile.runner_id);
        Ok(())
    }

    fn status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            installed: self.installed.lock().unwrap().contains(&profile.runner_id),
            running: self.running.lock().unwrap().contains(&profile.runner_id),
            enabled: false,
        })
    }

    fn external_status(&self, profile: &RunnerProfile) -> Result<ServiceStatus> {
        let live = self
            .identities
            .lock()
            .unwrap()
            .values()
            .any(|descriptor| descriptor.path == profile.service.external_path);
        Ok(ServiceStatus {
            installed: live,
            running: live,
            enabled: false,
        })
    }

    fn disable_external(&self, profile: &RunnerProfile) -> Result<()> {
        self.record("disable_external");
        let gate = self.hold_disable.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.recv().unwrap();
        }
        self.drop_identity_at(profile.service.external_path.as_deref());
        Ok(())
    }

    fn remove_external(&self, profile: &RunnerProfile) -> Result<()> {
        self.record("remove_external");
        self.drop_identity_at(profile.service.external_path.as_deref());
        Ok(())
    }

    fn identity(&self, install_path: &Path) -> Result<Option<ServiceDescriptor>> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(&canonical(install_path))
            .cloned())
    }
}

/// A realistic-looking runner install under `root/<name>`.
pub fn fake_install(root: &Path, name: &str) -> PathBuf {
    let install = root.join(name);
    fs::create_dir_all(install.join("_diag")).unwrap();
    fs::write(install.join("config.sh"), "#!/bin/sh\n").unwrap();
    fs::write(install.join("run.sh"), "#!/bin/sh\nsleep 30\n").unwrap();
    fs::write(
        install.join(".runner"),
        r#"{
  "agentName": "fixture-runner",
  "labels": ["self-hosted", "fixture"],
  "serverUrl": "https://github.com/acme/widgets",
  "workFolder": "_work"
}"#,
    )
    .unwrap();
    install
}

pub struct TestRig {
    pub engine: AdoptionEngine,
    pub service: Arc<MockService>,
    pub scan_root: PathBuf,
    // Dropping cleans up every path the rig handed out.
    dir: TempDir,
}

/// Engine over a temp profile store, the mock backend, and a temp scan root.
pub fn rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let scan_root = dir.path().join("scan");
    fs::create_dir_all(&scan_root).unwrap();
    let store = ProfileStore::open(&dir.path().join("profiles.json")).unwrap();
    let service = MockService::new();
    let engine =
        AdoptionEngine::new(store, service.clone()).with_scan_roots(vec![scan_root.clone()]);
    TestRig {
        engine,
        service,
        scan_root,
        dir,
    }
}

impl TestRig {
    /// Fresh destination path under the rig's tempdir (not yet created).
    pub fn destination(&self, name: &str) -> PathBuf {
        self.dir.path().join("managed").join(name)
    }

    /// Insert a profile directly, bypassing scan and adopt.
    pub fn seed(&self, profile: RunnerProfile) {
        self.engine
            .store()
            .update(|registry| registry.runners.push(profile))
            .unwrap();
    }

    /// Mark the runner as having a managed service, as if one had been
    /// installed for it, so lifecycle operations go through the backend.
    pub fn make_service_managed(&self, runner_id: &str) {
        let profile = self
            .engine
            .store()
            .update_runner(runner_id, |runner| {
                runner.service.provider = ServiceProvider::Corral;
                runner.service.installed = true;
            })
            .unwrap();
        self.service.install(&profile).unwrap();
    }
}

/// Hand-built profile for operations that do not need the adopt flow.
pub fn profile_at(install_path: &Path) -> RunnerProfile {
    RunnerProfile {
        runner_id: corral::profile::new_runner_id(),
        display_name: "fixture".to_string(),
        runner_name: "fixture".to_string(),
        scope: None,
        labels: vec!["self-hosted".to_string()],
        work_dir: "/tmp/work".to_string(),
        install: InstallRecord {
            mode: InstallMode::Adopted,
            install_path: install_path.to_string_lossy().to_string(),
            adopted_from_path: None,
            migration_status: MigrationStatus::None,
        },
        service: ServiceRecord::default(),
        created_at: corral::profile::now_iso8601(),
        last_seen_at: None,
    }
}
