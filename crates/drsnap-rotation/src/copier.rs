//! Copy executor: idempotent, quota-tolerant cross-region replication of copy candidates.
//!
//! Every candidate is attempted concurrently and independently. The executor
//! waits for every attempt before reporting, so no copy is left in flight
//! with an unobserved outcome.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info};

use crate::config::{ProbeErrorPolicy, RotationConfig};
use crate::error::{Result, RotationError};
use crate::inventory::{probe_replica, Probe};
use crate::model::{ReplicaId, Snapshot};
use crate::notify::{Alerter, Severity};
use crate::service::{CopyRequest, RdsApi};

/// Whether stale, uncopied snapshots raise warnings and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeCheck {
    /// Raise staleness notifications.
    Enabled,
    /// Stay quiet, e.g. during the initial bulk sync where large gaps are expected.
    Disabled,
}

impl AgeCheck {
    /// Returns true if staleness notifications are raised.
    pub fn is_enabled(&self) -> bool {
        matches!(self, AgeCheck::Enabled)
    }
}

/// How a single candidate was resolved without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// A copy request was accepted.
    Copied,
    /// The replica already exists in the destination region.
    AlreadyReplicated,
    /// The probe failed and the policy says to assume the replica exists.
    ProbeFailedAssumedCopied,
    /// The copy was rejected for quota exhaustion and skipped for this run.
    QuotaSkipped,
}

/// Result for one candidate.
#[derive(Debug, Clone)]
pub struct CopyResult {
    /// Replica identifier derived from the candidate.
    pub replica_id: ReplicaId,
    /// What happened.
    pub outcome: std::result::Result<CopyOutcome, RotationError>,
}

/// Summary of a copy run for one instance.
#[derive(Debug, Clone, Default)]
pub struct CopySummary {
    /// Candidates attempted.
    pub candidates: usize,
    /// Copies issued.
    pub copied: usize,
    /// Candidates already present in the destination.
    pub already_replicated: usize,
    /// Candidates skipped because the probe failed.
    pub probe_assumed: usize,
    /// Candidates skipped for quota exhaustion.
    pub quota_skipped: usize,
    /// Candidates that failed.
    pub failed: usize,
    /// Per-candidate results, in candidate order.
    pub results: Vec<CopyResult>,
}

impl CopySummary {
    fn from_results(results: Vec<CopyResult>) -> Self {
        let mut summary = CopySummary {
            candidates: results.len(),
            ..Default::default()
        };
        for result in &results {
            match &result.outcome {
                Ok(CopyOutcome::Copied) => summary.copied += 1,
                Ok(CopyOutcome::AlreadyReplicated) => summary.already_replicated += 1,
                Ok(CopyOutcome::ProbeFailedAssumedCopied) => summary.probe_assumed += 1,
                Ok(CopyOutcome::QuotaSkipped) => summary.quota_skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary.results = results;
        summary
    }

    /// Returns true if there was nothing to copy.
    pub fn is_empty(&self) -> bool {
        self.candidates == 0
    }

    /// Returns true if every candidate resolved without error.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// First failure in candidate order.
    pub fn first_error(&self) -> Option<&RotationError> {
        self.results.iter().find_map(|r| r.outcome.as_ref().err())
    }
}

/// Staleness severity for an uncopied snapshot of the given age. Both
/// thresholds are exclusive; the alert threshold wins over the warning one.
pub fn staleness(age_hours: f64, warning_hours: f64, alert_hours: f64) -> Option<Severity> {
    if age_hours > alert_hours {
        Some(Severity::Alert)
    } else if age_hours > warning_hours {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// Replicates copy candidates of one instance into the destination region.
pub struct CopyExecutor<'a> {
    api: &'a dyn RdsApi,
    config: &'a RotationConfig,
    alerter: &'a Alerter,
    now: DateTime<Utc>,
}

impl<'a> CopyExecutor<'a> {
    /// Create an executor. `now` is the reference time for snapshot ages.
    pub fn new(
        api: &'a dyn RdsApi,
        config: &'a RotationConfig,
        alerter: &'a Alerter,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            api,
            config,
            alerter,
            now,
        }
    }

    /// Attempt every candidate concurrently and wait for all of them.
    ///
    /// Succeeds if every candidate was copied, already present, or skipped
    /// for quota; otherwise returns the first failure in candidate order.
    pub async fn execute(
        &self,
        instance_id: &str,
        candidates: &[Snapshot],
        age_check: AgeCheck,
    ) -> Result<CopySummary> {
        if candidates.is_empty() {
            self.alerter
                .info(Some(instance_id), "No snapshots need to be copied to the DR region");
            return Ok(CopySummary::default());
        }

        let listing = candidates
            .iter()
            .map(|s| s.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.alerter.info(
            Some(instance_id),
            &format!("Evaluating snapshots for copy: {}", listing),
        );

        let attempts = candidates.iter().map(|snapshot| async move {
            let replica_id = ReplicaId::derive(&snapshot.id, &self.config.replica_prefix);
            let outcome = self
                .replicate(instance_id, snapshot, &replica_id, age_check)
                .await;
            CopyResult { replica_id, outcome }
        });
        let summary = CopySummary::from_results(join_all(attempts).await);
        for result in &summary.results {
            if let Err(e) = &result.outcome {
                error!(instance_id, snapshot_id = %result.replica_id, error = %e, "snapshot copy failed");
            }
        }

        debug!(
            instance_id,
            copied = summary.copied,
            already_replicated = summary.already_replicated,
            quota_skipped = summary.quota_skipped,
            failed = summary.failed,
            "copy run finished"
        );

        match summary.first_error() {
            Some(err) => Err(err.clone()),
            None => Ok(summary),
        }
    }

    async fn replicate(
        &self,
        instance_id: &str,
        snapshot: &Snapshot,
        replica_id: &ReplicaId,
        age_check: AgeCheck,
    ) -> std::result::Result<CopyOutcome, RotationError> {
        match probe_replica(self.api, replica_id).await {
            Probe::Found(_) => {
                self.alerter.info(
                    Some(instance_id),
                    &format!("Snapshot {} already exists in DR region.", replica_id),
                );
                return Ok(CopyOutcome::AlreadyReplicated);
            }
            Probe::Error(source) => match self.config.probe_error_policy {
                ProbeErrorPolicy::AssumeCopied => {
                    self.alerter
                        .warning(
                            Some(instance_id),
                            &format!(
                                "Could not check DR region for snapshot {} ({}); assuming it was already copied",
                                replica_id, source
                            ),
                        )
                        .await;
                    return Ok(CopyOutcome::ProbeFailedAssumedCopied);
                }
                ProbeErrorPolicy::Fail => {
                    return Err(RotationError::ProbeError {
                        snapshot_id: replica_id.to_string(),
                        source,
                    });
                }
            },
            Probe::NotFound => {}
        }

        if age_check.is_enabled() {
            self.check_staleness(instance_id, snapshot, replica_id).await;
        }

        let kms_key_id = if snapshot.encrypted {
            match &self.config.dr_kms_key {
                Some(key) => Some(key.clone()),
                None => {
                    return Err(RotationError::CopyError {
                        snapshot_id: replica_id.to_string(),
                        msg: "source snapshot is encrypted but no DR encryption key is configured"
                            .to_string(),
                    });
                }
            }
        } else {
            None
        };

        let request = CopyRequest {
            source_snapshot_ref: snapshot.source_ref.clone(),
            target_snapshot_id: replica_id.to_string(),
            source_region: snapshot.source_region().to_string(),
            copy_tags: true,
            kms_key_id,
        };

        info!(instance_id, replica_id = %replica_id, "Copying snapshot {} to DR region", replica_id);
        match self.api.copy_snapshot(&request).await {
            Ok(()) => Ok(CopyOutcome::Copied),
            Err(e) if e.is_quota_exceeded() => {
                self.alerter
                    .warning(
                        Some(instance_id),
                        &format!("Ignoring snapshot copy quota error: {}", e),
                    )
                    .await;
                Ok(CopyOutcome::QuotaSkipped)
            }
            Err(e) => Err(RotationError::CopyError {
                snapshot_id: replica_id.to_string(),
                msg: e.to_string(),
            }),
        }
    }

    async fn check_staleness(&self, instance_id: &str, snapshot: &Snapshot, replica_id: &ReplicaId) {
        let Some(age_hours) = snapshot.age_hours(self.now) else {
            return;
        };
        let severity = staleness(
            age_hours,
            self.config.copy_age_warning_hours,
            self.config.copy_age_alert_hours,
        );
        let msg = format!(
            "Snapshot {} is {:.1} hours old and has not been copied to the DR region",
            replica_id, age_hours
        );
        match severity {
            Some(Severity::Alert) => self.alerter.alert(Some(instance_id), &msg).await,
            Some(Severity::Warning) => self.alerter.warning(Some(instance_id), &msg).await,
            _ => {}
        }
    }
}
