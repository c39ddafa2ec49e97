// src/profile.rs

//! Persistent data model for managed runners
//!
//! A `RunnerProfile` is the engine's unit of ownership: one record per runner
//! installation under managed lifecycle. Profiles are created by adoption,
//! mutated through migration and service operations, and destroyed on
//! deletion. All mutation goes through the store; nothing holds private
//! copies.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a runner is registered, inferred from its server URL.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunnerScope {
    Repo { owner: String, repo: String },
    Org { org: String },
    Enterprise { enterprise: String },
}

impl RunnerScope {
    pub fn url(&self) -> String {
        match self {
            RunnerScope::Repo { owner, repo } => format!("https://github.com/{owner}/{repo}"),
            RunnerScope::Org { org } => format!("https://github.com/{org}"),
            RunnerScope::Enterprise { enterprise } => {
                format!("https://github.com/enterprises/{enterprise}")
            }
        }
    }
}

/// How the install directory came under management.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Files live in engine-controlled storage
    Managed,
    /// Files stay where they were discovered
    Adopted,
}

/// State machine field for the copy -> verify -> delete workflow.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    #[default]
    None,
    Moved,
    Verified,
    Failed,
}

/// Which subsystem owns the runner's OS service entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProvider {
    Corral,
    External,
    Unknown,
}

/// Identity of an external service captured before we disable it, so the
/// user can restore it by hand.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExternalRestoreRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstallRecord {
    pub mode: InstallMode,
    pub install_path: String,
    /// Set iff a move was ever attempted; cleared only by a successful
    /// delete-original.
    #[serde(default)]
    pub adopted_from_path: Option<String>,
    #[serde(default)]
    pub migration_status: MigrationStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceRecord {
    pub installed: bool,
    pub run_on_boot: bool,
    pub provider: ServiceProvider,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_path: Option<String>,
    #[serde(default)]
    pub external_restore: Option<ExternalRestoreRecord>,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            installed: false,
            run_on_boot: false,
            provider: ServiceProvider::Unknown,
            external_id: None,
            external_path: None,
            external_restore: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunnerProfile {
    pub runner_id: String,
    pub display_name: String,
    pub runner_name: String,
    pub scope: Option<RunnerScope>,
    pub labels: Vec<String>,
    pub work_dir: String,
    pub install: InstallRecord,
    pub service: ServiceRecord,
    pub created_at: String,
    #[serde(default)]
    pub last_seen_at: Option<String>,
}

/// Fresh, never-reused runner id.
pub fn new_runner_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn default_runner_name() -> String {
    fn normalize(value: Option<String>) -> Option<String> {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    normalize(
        hostname::get()
            .ok()
            .and_then(|value| value.into_string().ok()),
    )
    .or_else(|| normalize(std::env::var("HOSTNAME").ok()))
    .or_else(|| normalize(std::env::var("COMPUTERNAME").ok()))
    .unwrap_or_else(|| "corral-runner".to_string())
}

pub fn default_runner_labels() -> Vec<String> {
    let platform = match std::env::consts::OS {
        "macos" => "macOS".to_string(),
        "windows" => "Windows".to_string(),
        "linux" => "Linux".to_string(),
        other => other.to_string(),
    };
    vec![
        "self-hosted".to_string(),
        platform,
        std::env::consts::ARCH.to_uppercase(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_status_defaults_to_none() {
        assert_eq!(MigrationStatus::default(), MigrationStatus::None);
    }

    #[test]
    fn runner_ids_are_unique() {
        let a = new_runner_id();
        let b = new_runner_id();
        assert_ne!(a, b);
    }

    #[test]
    fn profile_round_trips_through_json() {
        let profile = RunnerProfile {
            runner_id: new_runner_id(),
            display_name: "Test".to_string(),
            runner_name: "runner-1".to_string(),
            scope: Some(RunnerScope::Org {
                org: "acme".to_string(),
            }),
            labels: default_runner_labels(),
            work_dir: "/tmp/work".to_string(),
            install: InstallRecord {
                mode: InstallMode::Adopted,
                install_path: "/tmp/runner".to_string(),
                adopted_from_path: None,
                migration_status: MigrationStatus::None,
            },
            service: ServiceRecord::default(),
            created_at: now_iso8601(),
            last_seen_at: None,
        };
        let json = serde_json::to_string(&profile).expect("serialize");
        let decoded: RunnerProfile = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded.runner_id, profile.runner_id);
        assert_eq!(decoded.install.mode, InstallMode::Adopted);
    }

    #[test]
    fn default_labels_include_self_hosted() {
        let labels = default_runner_labels();
        assert!(labels.contains(&"self-hosted".to_string()));
        assert_eq!(labels.len(), 3);
    }
}
