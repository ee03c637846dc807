//! Snapshot inventory: per-instance snapshot listings and the replica existence probe.

use futures::stream::{Stream, TryStreamExt};

use crate::catalog::paginate;
use crate::error::{Result, RotationError, ServiceError};
use crate::model::{RegionRole, ReplicaId, Snapshot};
use crate::service::{RdsApi, ServiceResult, SnapshotQuery};

/// Outcome of probing the destination region for a replica.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    /// The replica exists.
    Found(Snapshot),
    /// The service reported that the replica does not exist.
    NotFound,
    /// The probe failed for another reason; existence is unknown.
    Error(ServiceError),
}

/// Lazily list snapshots of one instance in a region.
pub fn snapshots<'a>(
    api: &'a dyn RdsApi,
    region: RegionRole,
    query: &'a SnapshotQuery,
) -> impl Stream<Item = ServiceResult<Snapshot>> + 'a {
    paginate(move |marker| api.describe_snapshots(region, query, marker))
}

/// List every snapshot matching `query`, failing with
/// [`RotationError::InventoryUnavailable`] if any page fails.
pub async fn list_snapshots(
    api: &dyn RdsApi,
    region: RegionRole,
    query: &SnapshotQuery,
) -> Result<Vec<Snapshot>> {
    snapshots(api, region, query)
        .try_collect()
        .await
        .map_err(|source| RotationError::InventoryUnavailable {
            instance_id: query.instance_id.clone(),
            source,
        })
}

/// Look for a replica in the destination region.
pub async fn probe_replica(api: &dyn RdsApi, replica: &ReplicaId) -> Probe {
    match api
        .describe_snapshot(RegionRole::Destination, replica.as_str())
        .await
    {
        Ok(snapshot) => Probe::Found(snapshot),
        Err(e) if e.is_not_found() => Probe::NotFound,
        Err(e) => Probe::Error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRds, SnapshotBuilder};
    use crate::model::SnapshotType;

    #[tokio::test]
    async fn test_lists_only_requested_type_and_instance() {
        let rds = MemoryRds::new().with_page_size(2);
        for minute in 0..3 {
            rds.add_snapshot(
                RegionRole::Source,
                SnapshotBuilder::automated("db-a", &format!("2024-03-01-06-0{}", minute)).build(),
            )
            .await;
        }
        rds.add_snapshot(
            RegionRole::Source,
            SnapshotBuilder::automated("db-b", "2024-03-01-06-00").build(),
        )
        .await;
        rds.add_snapshot(
            RegionRole::Source,
            SnapshotBuilder::manual("db-a", "db-a-before-upgrade").build(),
        )
        .await;

        let listed = list_snapshots(&rds, RegionRole::Source, &SnapshotQuery::automated("db-a"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed
            .iter()
            .all(|s| s.instance_id == "db-a" && s.snapshot_type == SnapshotType::Automated));
    }

    #[tokio::test]
    async fn test_regions_are_separate() {
        let rds = MemoryRds::new();
        rds.add_snapshot(
            RegionRole::Destination,
            SnapshotBuilder::manual("db-a", "db-a-2024-03-01-06-00").build(),
        )
        .await;

        let source = list_snapshots(&rds, RegionRole::Source, &SnapshotQuery::manual("db-a"))
            .await
            .unwrap();
        let dest = list_snapshots(&rds, RegionRole::Destination, &SnapshotQuery::manual("db-a"))
            .await
            .unwrap();
        assert!(source.is_empty());
        assert_eq!(dest.len(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_inventory_unavailable() {
        let rds = MemoryRds::new();
        rds.fail_snapshot_listing("db-a").await;

        let err = list_snapshots(&rds, RegionRole::Source, &SnapshotQuery::automated("db-a"))
            .await
            .unwrap_err();
        match err {
            RotationError::InventoryUnavailable { instance_id, .. } => assert_eq!(instance_id, "db-a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    mod probe {
        use super::*;

        #[tokio::test]
        async fn test_found() {
            let rds = MemoryRds::new();
            rds.add_snapshot(
                RegionRole::Destination,
                SnapshotBuilder::manual("db-a", "db-a-2024-03-01-06-00").build(),
            )
            .await;

            let probe = probe_replica(&rds, &ReplicaId::derive("rds:db-a-2024-03-01-06-00", "rds:")).await;
            assert!(matches!(probe, Probe::Found(s) if s.id == "db-a-2024-03-01-06-00"));
        }

        #[tokio::test]
        async fn test_not_found() {
            let rds = MemoryRds::new();
            let probe = probe_replica(&rds, &ReplicaId::derive("rds:db-a-2024-03-01-06-00", "rds:")).await;
            assert_eq!(probe, Probe::NotFound);
        }

        #[tokio::test]
        async fn test_other_error_is_not_absence() {
            let rds = MemoryRds::new();
            rds.fail_probe("db-a-2024-03-01-06-00").await;
            let probe = probe_replica(&rds, &ReplicaId::derive("rds:db-a-2024-03-01-06-00", "rds:")).await;
            assert!(matches!(probe, Probe::Error(e) if !e.is_not_found()));
        }

        #[tokio::test]
        async fn test_probe_only_looks_at_destination() {
            let rds = MemoryRds::new();
            rds.add_snapshot(
                RegionRole::Source,
                SnapshotBuilder::manual("db-a", "db-a-2024-03-01-06-00").build(),
            )
            .await;
            let probe = probe_replica(&rds, &ReplicaId::derive("db-a-2024-03-01-06-00", "rds:")).await;
            assert_eq!(probe, Probe::NotFound);
        }
    }
}
