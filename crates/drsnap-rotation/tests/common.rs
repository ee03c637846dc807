//! Common fixtures for rotation integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use drsnap_rotation::{
    Alerter, DatabaseInstance, MemoryRds, Notifier, RdsApi, RecordingNotifier, RegionRole,
    RotationConfig, Rotator, Snapshot, SnapshotBuilder, TriggerHandler,
};
use std::sync::Arc;

pub const WARNINGS: &str = "#dr-warnings";
pub const ALERTS: &str = "#dr-alerts";

/// Fixed trigger time used by every scenario.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

/// Baseline configuration: 7 day retention, 24h warning, 48h alert.
pub fn config() -> RotationConfig {
    RotationConfig {
        dr_region: "us-west-2".to_string(),
        dr_kms_key: Some("arn:aws:kms:us-west-2:000000000000:key/dr".to_string()),
        ..RotationConfig::default()
    }
}

/// An automated snapshot of `instance` taken `hours` before [`now`].
pub fn snapshot_aged(instance: &str, hours: i64) -> Snapshot {
    let stamp = (now() - Duration::hours(hours))
        .format("%Y-%m-%d-%H-%M")
        .to_string();
    SnapshotBuilder::automated(instance, &stamp).build()
}

/// Replica identifier for an automated snapshot.
pub fn replica_of(snapshot: &Snapshot) -> String {
    snapshot.id.trim_start_matches("rds:").to_string()
}

/// In-memory backend, recording notifier and a handler wired together.
pub struct Fixture {
    pub rds: Arc<MemoryRds>,
    pub notifier: Arc<RecordingNotifier>,
    pub handler: TriggerHandler,
}

impl Fixture {
    pub fn new(config: RotationConfig) -> Self {
        let rds = Arc::new(MemoryRds::new().with_page_size(2));
        let notifier = Arc::new(RecordingNotifier::new());
        let alerter = Alerter::new(
            Some(notifier.clone() as Arc<dyn Notifier>),
            Some(WARNINGS.to_string()),
            Some(ALERTS.to_string()),
        );
        let rotator = Rotator::new(rds.clone() as Arc<dyn RdsApi>, config, alerter)
            .expect("valid test config");
        Self {
            rds,
            notifier,
            handler: TriggerHandler::new(rotator),
        }
    }

    pub async fn instance(&self, id: &str, retention: u32) {
        self.rds.add_instance(DatabaseInstance::new(id, retention)).await;
    }

    pub async fn source(&self, snapshot: Snapshot) {
        self.rds.add_snapshot(RegionRole::Source, snapshot).await;
    }

    pub async fn replica(&self, instance: &str, id: &str) {
        self.rds
            .add_snapshot(
                RegionRole::Destination,
                SnapshotBuilder::manual(instance, id).build(),
            )
            .await;
    }
}
