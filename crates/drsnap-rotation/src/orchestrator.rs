//! Rotation orchestrator.
//!
//! Per instance: filter gate, then Copying, then Pruning. Pruning only runs
//! after a successful copy stage. Instance pipelines run concurrently and
//! independently; a failed instance never stops its siblings.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::catalog::{list_instances, InstanceFilter, InstanceScope};
use crate::config::{ConfigError, RotationConfig};
use crate::copier::{AgeCheck, CopyExecutor, CopySummary};
use crate::error::{Result, RotationError};
use crate::inventory::list_snapshots;
use crate::model::{DatabaseInstance, RegionRole, RotationCutoff};
use crate::notify::Alerter;
use crate::planner::select_candidates;
use crate::pruner::{PruneSummary, Pruner};
use crate::service::{RdsApi, SnapshotQuery};

/// Read-only values shared by every pipeline of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct RotationContext {
    /// Trigger time.
    pub now: DateTime<Utc>,
    /// Computed once from `now` and the retention window.
    pub cutoff: RotationCutoff,
    /// Whether staleness notifications are raised.
    pub age_check: AgeCheck,
}

impl RotationContext {
    /// Fails with [`RotationError::RetentionOutOfRange`] if the cutoff
    /// cannot be represented.
    pub fn new(now: DateTime<Utc>, retention_days: u32, age_check: AgeCheck) -> Result<Self> {
        let cutoff = RotationCutoff::compute(now, retention_days).ok_or(
            RotationError::RetentionOutOfRange {
                days: retention_days,
            },
        )?;
        Ok(Self {
            now,
            cutoff,
            age_check,
        })
    }
}

/// Stage an instance pipeline was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStage {
    /// Listing, probing and copying recent snapshots.
    Copying,
    /// Deleting expired replicas.
    Pruning,
    /// Finished or skipped.
    Done,
}

/// Why an instance was not rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The identifier does not match the instance filter.
    FilteredOut,
    /// The instance has automated backups disabled.
    BackupsDisabled,
}

/// Result of one instance pipeline.
#[derive(Debug, Clone)]
pub enum InstanceOutcome {
    /// Skipped at the gate; counts as success.
    Skipped(SkipReason),
    /// Both stages completed.
    Rotated {
        /// Copy stage results.
        copy: CopySummary,
        /// Prune stage results.
        prune: PruneSummary,
    },
    /// The pipeline stopped in `stage`.
    Failed {
        /// Stage that failed.
        stage: InstanceStage,
        /// First error of that stage.
        error: RotationError,
    },
}

impl InstanceOutcome {
    /// Stage the pipeline ended in.
    pub fn stage(&self) -> InstanceStage {
        match self {
            InstanceOutcome::Failed { stage, .. } => *stage,
            _ => InstanceStage::Done,
        }
    }

    /// Skips count as success.
    pub fn is_success(&self) -> bool {
        !matches!(self, InstanceOutcome::Failed { .. })
    }
}

/// Per-instance entry of a [`RotationReport`].
#[derive(Debug, Clone)]
pub struct InstanceReport {
    /// Instance identifier.
    pub instance_id: String,
    /// How its pipeline ended.
    pub outcome: InstanceOutcome,
}

/// Outcome of rotating every instance in scope.
#[derive(Debug, Clone)]
pub struct RotationReport {
    /// Cutoff the invocation ran with.
    pub cutoff: RotationCutoff,
    /// Per-instance results, in catalog order.
    pub instances: Vec<InstanceReport>,
}

impl RotationReport {
    /// Returns true if no instance pipeline failed.
    pub fn is_success(&self) -> bool {
        self.instances.iter().all(|i| i.outcome.is_success())
    }

    /// Identifiers of failed instances, in catalog order.
    pub fn failed_instances(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|i| !i.outcome.is_success())
            .map(|i| i.instance_id.clone())
            .collect()
    }

    fn rotated(&self) -> impl Iterator<Item = (&CopySummary, &PruneSummary)> {
        self.instances.iter().filter_map(|i| match &i.outcome {
            InstanceOutcome::Rotated { copy, prune } => Some((copy, prune)),
            _ => None,
        })
    }

    /// Copies issued across all instances.
    pub fn copied(&self) -> usize {
        self.rotated().map(|(c, _)| c.copied).sum()
    }

    /// Replicas deleted across all instances.
    pub fn deleted(&self) -> usize {
        self.rotated().map(|(_, p)| p.deleted).sum()
    }

    /// Format as a one-line human-readable summary.
    pub fn summary(&self) -> String {
        let skipped = self
            .instances
            .iter()
            .filter(|i| matches!(i.outcome, InstanceOutcome::Skipped(_)))
            .count();
        let quota_skipped: usize = self.rotated().map(|(c, _)| c.quota_skipped).sum();
        let already: usize = self.rotated().map(|(c, _)| c.already_replicated).sum();
        format!(
            "{} instance(s): {} copied, {} already replicated, {} quota-skipped, {} deleted; {} skipped, {} failed",
            self.instances.len(),
            self.copied(),
            already,
            quota_skipped,
            self.deleted(),
            skipped,
            self.failed_instances().len()
        )
    }

    /// Ok if every pipeline succeeded, otherwise [`RotationError::InstancesFailed`]
    /// carrying the first failure in catalog order.
    pub fn into_result(self) -> Result<Self> {
        let first = self.instances.iter().find_map(|i| match &i.outcome {
            InstanceOutcome::Failed { error, .. } => Some(error.clone()),
            _ => None,
        });
        match first {
            None => Ok(self),
            Some(first) => Err(RotationError::InstancesFailed {
                failed: self.failed_instances(),
                first: Box::new(first),
            }),
        }
    }
}

/// Drives catalog, copy and prune for every instance in scope.
#[derive(Clone)]
pub struct Rotator {
    api: Arc<dyn RdsApi>,
    config: Arc<RotationConfig>,
    filter: InstanceFilter,
    alerter: Alerter,
}

impl Rotator {
    /// Create a rotator. Fails if the instance filter does not compile.
    pub fn new(
        api: Arc<dyn RdsApi>,
        config: RotationConfig,
        alerter: Alerter,
    ) -> std::result::Result<Self, ConfigError> {
        let filter = InstanceFilter::from_config(&config)?;
        Ok(Self {
            api,
            config: Arc::new(config),
            filter,
            alerter,
        })
    }

    /// Configuration the rotator was built with.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Notification router.
    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    /// Context for an invocation triggered at `now`.
    pub fn context(&self, now: DateTime<Utc>, age_check: AgeCheck) -> Result<RotationContext> {
        RotationContext::new(now, self.config.retention_days, age_check)
    }

    /// Rotate every instance in `scope`.
    ///
    /// Returns `Err` only if the catalog could not be listed; per-instance
    /// failures are recorded in the report (see [`RotationReport::into_result`]).
    pub async fn rotate(&self, scope: &InstanceScope, ctx: &RotationContext) -> Result<RotationReport> {
        let instances = list_instances(self.api.as_ref(), scope).await?;
        debug!(count = instances.len(), cutoff = %ctx.cutoff.timestamp(), "rotating instances");

        let pipelines = instances.iter().map(|instance| async move {
            InstanceReport {
                instance_id: instance.id.clone(),
                outcome: self.rotate_instance(instance, ctx).await,
            }
        });
        let report = RotationReport {
            cutoff: ctx.cutoff,
            instances: join_all(pipelines).await,
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// Run one instance through the gate and both stages.
    pub async fn rotate_instance(
        &self,
        instance: &DatabaseInstance,
        ctx: &RotationContext,
    ) -> InstanceOutcome {
        let id = instance.id.as_str();
        if !self.filter.matches(id) {
            self.alerter
                .info(Some(id), "Skipping database b/c it does not match instance filter");
            return InstanceOutcome::Skipped(SkipReason::FilteredOut);
        }
        if !instance.backups_enabled() {
            self.alerter
                .info(Some(id), "Skipping snapshot rotation b/c backups are disabled");
            return InstanceOutcome::Skipped(SkipReason::BackupsDisabled);
        }

        let copy = match self.copy_stage(id, ctx).await {
            Ok(copy) => copy,
            Err(error) => return self.fail(id, InstanceStage::Copying, error),
        };
        let prune = match Pruner::new(self.api.as_ref(), &self.alerter)
            .prune(id, ctx.cutoff)
            .await
        {
            Ok(prune) => prune,
            Err(error) => return self.fail(id, InstanceStage::Pruning, error),
        };
        InstanceOutcome::Rotated { copy, prune }
    }

    async fn copy_stage(&self, instance_id: &str, ctx: &RotationContext) -> Result<CopySummary> {
        self.alerter.info(Some(instance_id), "Kicking off snapshot copies");
        let inventory = list_snapshots(
            self.api.as_ref(),
            RegionRole::Source,
            &SnapshotQuery::automated(instance_id),
        )
        .await?;
        let candidates = select_candidates(inventory, ctx.cutoff);
        CopyExecutor::new(self.api.as_ref(), &self.config, &self.alerter, ctx.now)
            .execute(instance_id, &candidates, ctx.age_check)
            .await
    }

    fn fail(&self, instance_id: &str, stage: InstanceStage, error: RotationError) -> InstanceOutcome {
        error!(instance_id, ?stage, error = %error, "instance rotation failed");
        InstanceOutcome::Failed { stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRds, RecordingNotifier, SnapshotBuilder};
    use crate::notify::Notifier;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn config() -> RotationConfig {
        RotationConfig {
            dr_region: "us-west-2".to_string(),
            ..RotationConfig::default()
        }
    }

    fn rotator(rds: &Arc<MemoryRds>, config: RotationConfig) -> (Rotator, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let alerter = Alerter::new(
            Some(notifier.clone() as Arc<dyn Notifier>),
            Some("#dr-warnings".to_string()),
            Some("#dr-alerts".to_string()),
        );
        let rotator = Rotator::new(rds.clone() as Arc<dyn RdsApi>, config, alerter).unwrap();
        (rotator, notifier)
    }

    #[test]
    fn test_context_computes_cutoff_once() {
        let ctx = RotationContext::new(now(), 7, AgeCheck::Enabled).unwrap();
        assert_eq!(
            ctx.cutoff.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_context_rejects_unrepresentable_cutoff() {
        let err = RotationContext::new(now(), 100_000_000, AgeCheck::Enabled).unwrap_err();
        assert!(matches!(
            err,
            RotationError::RetentionOutOfRange { days: 100_000_000 }
        ));
    }

    #[test]
    fn test_bad_filter_rejected() {
        let rds = Arc::new(MemoryRds::new());
        let config = RotationConfig {
            instance_filter: Some("(".to_string()),
            ..config()
        };
        assert!(Rotator::new(rds as Arc<dyn RdsApi>, config, Alerter::silent()).is_err());
    }

    mod pipeline {
        use super::*;

        #[tokio::test]
        async fn test_copy_then_prune() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.add_snapshot(
                RegionRole::Source,
                SnapshotBuilder::automated("db-a", "2024-03-10-06-00").build(),
            )
            .await;
            rds.add_snapshot(
                RegionRole::Destination,
                SnapshotBuilder::manual("db-a", "db-a-2024-02-01-06-00").build(),
            )
            .await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert!(report.is_success());
            assert_eq!(report.copied(), 1);
            assert_eq!(report.deleted(), 1);
            assert_eq!(
                rds.snapshot_ids(RegionRole::Destination).await,
                vec!["db-a-2024-03-10-06-00".to_string()]
            );
        }

        #[tokio::test]
        async fn test_copy_failure_skips_pruning() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.add_snapshot(
                RegionRole::Source,
                SnapshotBuilder::automated("db-a", "2024-03-10-06-00").build(),
            )
            .await;
            rds.add_snapshot(
                RegionRole::Destination,
                SnapshotBuilder::manual("db-a", "db-a-2024-02-01-06-00").build(),
            )
            .await;
            rds.fail_copy("db-a-2024-03-10-06-00").await;
            let (rotator, notifier) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert_eq!(report.instances[0].outcome.stage(), InstanceStage::Copying);
            assert_eq!(rds.calls().await.delete_snapshot, 0);
            assert!(notifier.sent_to("#dr-alerts").await.is_empty());
            match report.into_result().unwrap_err() {
                RotationError::InstancesFailed { failed, first } => {
                    assert_eq!(failed, vec!["db-a".to_string()]);
                    assert!(matches!(*first, RotationError::CopyError { .. }));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_prune_failure_reported_in_pruning_stage() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.add_snapshot(
                RegionRole::Destination,
                SnapshotBuilder::manual("db-a", "db-a-2024-02-01-06-00").build(),
            )
            .await;
            rds.fail_delete("db-a-2024-02-01-06-00").await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert_eq!(report.instances[0].outcome.stage(), InstanceStage::Pruning);
            assert!(!report.is_success());
        }

        #[tokio::test]
        async fn test_failed_instance_does_not_stop_siblings() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.add_instance(DatabaseInstance::new("db-b", 7)).await;
            rds.add_snapshot(
                RegionRole::Source,
                SnapshotBuilder::automated("db-b", "2024-03-10-06-00").build(),
            )
            .await;
            rds.fail_snapshot_listing("db-a").await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert_eq!(report.failed_instances(), vec!["db-a".to_string()]);
            assert_eq!(report.copied(), 1);
        }
    }

    mod gate {
        use super::*;

        #[tokio::test]
        async fn test_filtered_instance_makes_no_snapshot_calls() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("stage-b", 7)).await;
            let config = RotationConfig {
                instance_filter: Some("prod-.*".to_string()),
                ..config()
            };
            let (rotator, _) = rotator(&rds, config);
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert!(matches!(
                report.instances[0].outcome,
                InstanceOutcome::Skipped(SkipReason::FilteredOut)
            ));
            assert_eq!(rds.calls().await.snapshot_calls(), 0);
        }

        #[tokio::test]
        async fn test_backups_disabled_skipped_before_inventory() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 0)).await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap();

            assert!(report.is_success());
            assert!(matches!(
                report.instances[0].outcome,
                InstanceOutcome::Skipped(SkipReason::BackupsDisabled)
            ));
            assert_eq!(rds.calls().await.snapshot_calls(), 0);
        }
    }

    mod scope {
        use super::*;

        #[tokio::test]
        async fn test_single_instance_scope() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.add_instance(DatabaseInstance::new("db-b", 7)).await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator
                .rotate(&InstanceScope::One("db-b".to_string()), &ctx)
                .await
                .unwrap();

            assert_eq!(report.instances.len(), 1);
            assert_eq!(report.instances[0].instance_id, "db-b");
        }

        #[tokio::test]
        async fn test_unknown_instance_is_empty_success() {
            let rds = Arc::new(MemoryRds::new());
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let report = rotator
                .rotate(&InstanceScope::One("ghost".to_string()), &ctx)
                .await
                .unwrap();

            assert!(report.instances.is_empty());
            assert!(report.into_result().is_ok());
        }

        #[tokio::test]
        async fn test_catalog_failure_is_error() {
            let rds = Arc::new(MemoryRds::new());
            rds.add_instance(DatabaseInstance::new("db-a", 7)).await;
            rds.fail_instance_page(0).await;
            let (rotator, _) = rotator(&rds, config());
            let ctx = rotator.context(now(), AgeCheck::Enabled).unwrap();

            let err = rotator.rotate(&InstanceScope::All, &ctx).await.unwrap_err();

            assert!(matches!(err, RotationError::CatalogUnavailable { .. }));
        }
    }

    #[test]
    fn test_summary_line() {
        let report = RotationReport {
            cutoff: RotationCutoff::at(now()),
            instances: vec![InstanceReport {
                instance_id: "db-a".to_string(),
                outcome: InstanceOutcome::Skipped(SkipReason::FilteredOut),
            }],
        };
        assert_eq!(
            report.summary(),
            "1 instance(s): 0 copied, 0 already replicated, 0 quota-skipped, 0 deleted; 1 skipped, 0 failed"
        );
    }
}
