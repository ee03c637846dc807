//! Retention pruner for replicated snapshots in the destination region.
//!
//! Selection relies on the replica naming contract described in
//! [`crate::model`]: a replica is expired iff its identifier sorts strictly
//! before `<instance-id>-<cutoff as YYYY-MM-DD-HH-MM>`. Only destination
//! manual snapshots are ever considered.

use futures::future::join_all;
use tracing::{debug, error};

use crate::error::{Result, RotationError};
use crate::inventory::list_snapshots;
use crate::model::{RegionRole, RotationCutoff, Snapshot, SnapshotType};
use crate::notify::Alerter;
use crate::service::{RdsApi, SnapshotQuery};

/// Returns true if a replica identifier falls before the oldest retained one.
pub fn is_expired(snapshot_id: &str, oldest_allowed: &str) -> bool {
    snapshot_id < oldest_allowed
}

/// Pick the expired replicas from a destination manual-snapshot listing.
pub fn select_expired(replicas: Vec<Snapshot>, oldest_allowed: &str) -> Vec<Snapshot> {
    replicas
        .into_iter()
        .filter(|s| s.snapshot_type == SnapshotType::Manual && is_expired(&s.id, oldest_allowed))
        .collect()
}

/// Statistics from one pruning pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneSummary {
    /// Oldest retained identifier used for selection.
    pub oldest_allowed: String,
    /// Destination manual snapshots examined.
    pub examined: usize,
    /// Replicas deleted.
    pub deleted: usize,
    /// Deletions that failed.
    pub failed: usize,
}

/// Deletes expired replicas of one instance.
pub struct Pruner<'a> {
    api: &'a dyn RdsApi,
    alerter: &'a Alerter,
}

impl<'a> Pruner<'a> {
    /// Pruner deleting through `api` and reporting through `alerter`.
    pub fn new(api: &'a dyn RdsApi, alerter: &'a Alerter) -> Self {
        Self { api, alerter }
    }

    /// List, select and delete expired replicas of `instance_id`.
    ///
    /// Deletions run concurrently; all of them finish before the first
    /// failure (in listing order) is returned.
    pub async fn prune(&self, instance_id: &str, cutoff: RotationCutoff) -> Result<PruneSummary> {
        self.alerter
            .info(Some(instance_id), "Kicking off snapshot deletion in DR region");

        let oldest_allowed = cutoff.oldest_allowed_replica(instance_id);
        self.alerter.info(
            Some(instance_id),
            &format!("Finding snapshots older than {}", oldest_allowed),
        );

        let replicas = list_snapshots(
            self.api,
            RegionRole::Destination,
            &SnapshotQuery::manual(instance_id),
        )
        .await?;
        let examined = replicas.len();
        let expired = select_expired(replicas, &oldest_allowed);

        if expired.is_empty() {
            self.alerter
                .info(Some(instance_id), "No snapshots marked for deletion");
            return Ok(PruneSummary {
                oldest_allowed,
                examined,
                ..Default::default()
            });
        }

        let deletions = expired.iter().map(|snapshot| async move {
            self.alerter
                .info(Some(instance_id), &format!("Deleting snapshot {}", snapshot.id));
            let result = self
                .api
                .delete_snapshot(RegionRole::Destination, &snapshot.id)
                .await
                .map_err(|source| RotationError::DeleteError {
                    snapshot_id: snapshot.id.clone(),
                    source,
                });
            if let Err(e) = &result {
                error!(instance_id, snapshot_id = %snapshot.id, error = %e, "replica delete failed");
            }
            result
        });
        let results = join_all(deletions).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let summary = PruneSummary {
            oldest_allowed,
            examined,
            deleted: results.len() - failed,
            failed,
        };
        debug!(instance_id, deleted = summary.deleted, failed, "pruning finished");

        match results.into_iter().find_map(|r| r.err()) {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}
