//! drsnap: cross-region disaster-recovery rotation of automated database snapshots.
//!
//! Discovers source-region instances, copies their recent automated snapshots
//! into the DR region idempotently and quota-aware, raises staleness warnings
//! and alerts, and prunes DR replicas older than the retention window.

#![warn(missing_docs)]

#[cfg(feature = "aws")]
/// Amazon RDS backend.
pub mod aws;
/// Source-region instance catalog.
pub mod catalog;
/// Command-line interface.
pub mod cli;
/// Engine configuration.
pub mod config;
/// Cross-region copy executor.
pub mod copier;
/// Error types.
pub mod error;
/// Per-instance snapshot listings and replica probes.
pub mod inventory;
/// In-memory backend and notifier for tests and dry runs.
pub mod memory;
/// Domain types.
pub mod model;
/// Operator notifications.
pub mod notify;
/// Per-instance rotation pipelines.
pub mod orchestrator;
/// Replication candidate selection.
pub mod planner;
/// Retention pruning of DR replicas.
pub mod pruner;
/// Cloud API seam.
pub mod service;
/// Trigger classification and dispatch.
pub mod trigger;

#[cfg(feature = "aws")]
pub use aws::AwsRds;
pub use catalog::{InstanceFilter, InstanceScope};
pub use config::{ConfigError, ProbeErrorPolicy, RotationConfig};
pub use copier::{AgeCheck, CopyExecutor, CopyOutcome, CopySummary};
pub use error::{Result, RotationError, ServiceError};
pub use memory::{MemoryRds, RecordingNotifier, SnapshotBuilder};
pub use model::{DatabaseInstance, RegionRole, ReplicaId, RotationCutoff, Snapshot, SnapshotStatus, SnapshotType};
pub use notify::{Alerter, Notifier, NotifyError, Severity, SlackNotifier};
pub use orchestrator::{InstanceOutcome, RotationContext, RotationReport, Rotator};
pub use pruner::{PruneSummary, Pruner};
pub use service::{CopyRequest, RdsApi, SnapshotQuery};
pub use trigger::{EventError, InvocationReport, Trigger, TriggerHandler};
