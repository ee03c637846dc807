//! Boundary to the managed database service.
//!
//! The engine talks to both regions through the [`RdsApi`] trait. Each
//! listing call returns a single page; the engine drives pagination itself
//! so backends stay thin.

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::model::{DatabaseInstance, Page, RegionRole, Snapshot, SnapshotType};

/// Result type of a single collaborator call.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Filter for a snapshot listing. Shared and public snapshots are never included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Instance whose snapshots to list.
    pub instance_id: String,
    /// Snapshot origin to list.
    pub snapshot_type: SnapshotType,
}

impl SnapshotQuery {
    /// Automated snapshots of an instance.
    pub fn automated(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            snapshot_type: SnapshotType::Automated,
        }
    }

    /// Manual snapshots (replicas) of an instance.
    pub fn manual(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            snapshot_type: SnapshotType::Manual,
        }
    }
}

/// A cross-region copy into the destination region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Fully qualified reference of the source snapshot.
    pub source_snapshot_ref: String,
    /// Identifier of the replica to create.
    pub target_snapshot_id: String,
    /// Region the source snapshot lives in.
    pub source_region: String,
    /// Carry the source snapshot's tags onto the replica.
    pub copy_tags: bool,
    /// Destination encryption key; set only for encrypted sources.
    pub kms_key_id: Option<String>,
}

/// Operations the rotation engine needs from the database service.
///
/// Implementations must be safe to call concurrently; the engine issues
/// many calls at once across instances and snapshots.
#[async_trait]
pub trait RdsApi: Send + Sync {
    /// List one page of source-region instances, optionally narrowed to one identifier.
    ///
    /// An unknown identifier is reported as [`ServiceError::NotFound`].
    async fn describe_instances(
        &self,
        instance_id: Option<&str>,
        marker: Option<String>,
    ) -> ServiceResult<Page<DatabaseInstance>>;

    /// List one page of snapshots in a region.
    async fn describe_snapshots(
        &self,
        region: RegionRole,
        query: &SnapshotQuery,
        marker: Option<String>,
    ) -> ServiceResult<Page<Snapshot>>;

    /// Look up a single snapshot by identifier.
    ///
    /// A missing snapshot is reported as [`ServiceError::NotFound`].
    async fn describe_snapshot(&self, region: RegionRole, snapshot_id: &str)
        -> ServiceResult<Snapshot>;

    /// Start a cross-region copy into the destination region.
    ///
    /// Quota exhaustion is reported as [`ServiceError::QuotaExceeded`].
    async fn copy_snapshot(&self, request: &CopyRequest) -> ServiceResult<()>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, region: RegionRole, snapshot_id: &str) -> ServiceResult<()>;
}
