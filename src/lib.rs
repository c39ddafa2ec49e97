// src/lib.rs

//! Corral: adoption and migration engine for self-hosted CI runners
//!
//! Corral discovers pre-existing runner installs on a machine, works out how
//! each one is currently managed (no service, or an externally-owned OS
//! service), and brings it under managed lifecycle, either in place or by
//! copying it into managed storage. An original install is never deleted
//! until a functional verification proves the new location works.
//!
//! # Architecture
//!
//! - Profile-store-first: all durable state in one JSON registry document
//! - Per-runner serialization: at most one mutating operation in flight
//! - Partial migration states (`moved`, `failed`) are persisted data, so a
//!   restart resumes safely
//! - One service-capability trait with launchd/systemd/svc.cmd backends

pub mod discovery;
pub mod engine;
mod error;
pub mod logging;
pub mod paths;
pub mod profile;
pub mod runner;
pub mod service;
pub mod store;

pub use discovery::{looks_like_runner_install, scope_from_url, DiscoveryCandidate};
pub use engine::{AdoptOptions, AdoptionEngine, AdoptionStrategy, VerifyOptions, VerifyOutcome};
pub use error::{Error, Result};
pub use profile::{
    ExternalRestoreRecord, InstallMode, InstallRecord, MigrationStatus, RunnerProfile, RunnerScope,
    ServiceProvider, ServiceRecord,
};
pub use service::{ServiceControl, ServiceDescriptor, ServiceStatus};
pub use store::{ProfileStore, Registry};
