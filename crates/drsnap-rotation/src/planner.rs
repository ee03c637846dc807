//! Replication planner: which source snapshots are copy candidates.

use crate::model::{RotationCutoff, Snapshot};

/// Returns true if `snapshot` should be considered for replication.
///
/// A candidate is available and was created strictly after the cutoff.
/// Snapshots at or before the cutoff have aged out of the retention window.
pub fn is_candidate(snapshot: &Snapshot, cutoff: RotationCutoff) -> bool {
    snapshot.is_available()
        && snapshot
            .created_at
            .is_some_and(|created| created > cutoff.timestamp())
}

/// Select the copy candidates from a source-region automated inventory,
/// preserving inventory order.
pub fn select_candidates(inventory: Vec<Snapshot>, cutoff: RotationCutoff) -> Vec<Snapshot> {
    inventory
        .into_iter()
        .filter(|s| is_candidate(s, cutoff))
        .collect()
}
