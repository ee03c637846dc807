//! Core data types: instances, snapshots, the rotation cutoff and replica naming.
//!
//! Replica naming is a contract the retention pass depends on. A replica is
//! named after its source automated snapshot with the vendor prefix removed,
//! which yields `<instance-id>-YYYY-MM-DD-HH-MM` with a zero-padded,
//! fixed-width timestamp suffix. Because every field of the suffix is
//! zero-padded and ordered from most to least significant, comparing two
//! replica identifiers of the same instance as strings orders them by time.
//! Changing the replica name format breaks retention.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp layout used in replica identifiers.
pub const REPLICA_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// Prefix the managed service puts on automated snapshot identifiers.
pub const DEFAULT_REPLICA_PREFIX: &str = "rds:";

/// Which side of the replication a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionRole {
    /// The region holding the live instances and their automated snapshots.
    Source,
    /// The disaster-recovery region holding replicated copies.
    Destination,
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionRole::Source => write!(f, "source"),
            RegionRole::Destination => write!(f, "destination"),
        }
    }
}

/// A database instance as listed by the catalog. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    /// Instance identifier, unique per region.
    pub id: String,
    /// Automated backup retention period in days; 0 means backups are disabled.
    pub backup_retention_period: u32,
}

impl DatabaseInstance {
    /// Create an instance record.
    pub fn new(id: impl Into<String>, backup_retention_period: u32) -> Self {
        Self {
            id: id.into(),
            backup_retention_period,
        }
    }

    /// Returns true if the managed service takes automated backups of this instance.
    pub fn backups_enabled(&self) -> bool {
        self.backup_retention_period != 0
    }
}

/// Lifecycle status of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    /// Snapshot is still being taken or copied.
    Creating,
    /// Snapshot is complete and usable.
    Available,
    /// Any other status reported by the service.
    Other(String),
}

impl SnapshotStatus {
    /// Parse the service's status string.
    pub fn parse(status: &str) -> Self {
        match status {
            "creating" => SnapshotStatus::Creating,
            "available" => SnapshotStatus::Available,
            other => SnapshotStatus::Other(other.to_string()),
        }
    }
}

/// Snapshot origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotType {
    /// Taken by the managed service's backup schedule.
    Automated,
    /// Taken on request, which includes every replica this engine creates.
    Manual,
}

impl SnapshotType {
    /// Value used by the service API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            SnapshotType::Automated => "automated",
            SnapshotType::Manual => "manual",
        }
    }

    /// Parse the service's snapshot type string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "automated" => Some(SnapshotType::Automated),
            "manual" => Some(SnapshotType::Manual),
            _ => None,
        }
    }
}

/// A snapshot observed in either region. Snapshots are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier (automated ones carry the vendor prefix).
    pub id: String,
    /// Owning instance identifier.
    pub instance_id: String,
    /// Fully qualified reference used as the copy source (an ARN).
    pub source_ref: String,
    /// Creation time, absent while the service has not stamped it yet.
    pub created_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: SnapshotStatus,
    /// Whether the snapshot is encrypted at rest.
    pub encrypted: bool,
    /// Availability zone the snapshot was taken in, e.g. `us-east-1a`.
    pub availability_zone: String,
    /// Snapshot origin.
    pub snapshot_type: SnapshotType,
}

impl Snapshot {
    /// Region the snapshot lives in, derived from its availability zone by
    /// dropping the trailing zone letter (`us-east-1a` -> `us-east-1`).
    pub fn source_region(&self) -> &str {
        let az = self.availability_zone.as_str();
        az.strip_suffix(|c: char| c.is_ascii_lowercase()).unwrap_or(az)
    }

    /// Returns true if the snapshot has completed.
    pub fn is_available(&self) -> bool {
        self.status == SnapshotStatus::Available
    }

    /// Age in hours at `now`, with sub-hour precision. None without a creation time.
    pub fn age_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.created_at
            .map(|created| (now - created).num_milliseconds() as f64 / 3_600_000.0)
    }
}

/// Identifier of a replicated snapshot in the destination region.
///
/// Derived from the source snapshot identifier by stripping the vendor
/// prefix; this is the idempotency key used to detect an existing copy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Derive the replica identifier for a source snapshot identifier.
    pub fn derive(source_snapshot_id: &str, prefix: &str) -> Self {
        let id = if prefix.is_empty() {
            source_snapshot_id
        } else {
            source_snapshot_id
                .strip_prefix(prefix)
                .unwrap_or(source_snapshot_id)
        };
        Self(id.to_string())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single time boundary of an invocation: trigger time minus the retention window.
///
/// Snapshots created strictly after the cutoff are eligible for replication;
/// replicas named before the cutoff are eligible for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RotationCutoff(DateTime<Utc>);

impl RotationCutoff {
    /// Compute the cutoff for a trigger time and a retention window in days.
    ///
    /// None if the result falls outside the representable date range.
    pub fn compute(now: DateTime<Utc>, retention_days: u32) -> Option<Self> {
        Duration::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .map(Self)
    }

    /// Wrap an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp)
    }

    /// The cutoff timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    /// Oldest replica identifier that is still retained for `instance_id`:
    /// `<instance_id>-YYYY-MM-DD-HH-MM`.
    pub fn oldest_allowed_replica(&self, instance_id: &str) -> String {
        format!("{}-{}", instance_id, self.0.format(REPLICA_TIMESTAMP_FORMAT))
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Marker for the next page; None on the last page.
    pub marker: Option<String>,
}

impl<T> Page<T> {
    /// A final page.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            marker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_at(az: &str, created_at: Option<DateTime<Utc>>) -> Snapshot {
        Snapshot {
            id: "rds:db-1-2024-03-01-06-10".to_string(),
            instance_id: "db-1".to_string(),
            source_ref: "arn:aws:rds:us-east-1:123:snapshot:rds:db-1-2024-03-01-06-10".to_string(),
            created_at,
            status: SnapshotStatus::Available,
            encrypted: false,
            availability_zone: az.to_string(),
            snapshot_type: SnapshotType::Automated,
        }
    }

    mod replica_id {
        use super::*;

        #[test]
        fn test_strips_vendor_prefix() {
            let id = ReplicaId::derive("rds:db-1-2024-03-01-06-10", DEFAULT_REPLICA_PREFIX);
            assert_eq!(id.as_str(), "db-1-2024-03-01-06-10");
        }

        #[test]
        fn test_without_prefix_unchanged() {
            let id = ReplicaId::derive("db-1-2024-03-01-06-10", DEFAULT_REPLICA_PREFIX);
            assert_eq!(id.as_str(), "db-1-2024-03-01-06-10");
        }

        #[test]
        fn test_prefix_only_stripped_at_start() {
            let id = ReplicaId::derive("db-rds:x", DEFAULT_REPLICA_PREFIX);
            assert_eq!(id.to_string(), "db-rds:x");
        }

        #[test]
        fn test_empty_prefix() {
            let id = ReplicaId::derive("rds:db", "");
            assert_eq!(id.as_str(), "rds:db");
        }
    }

    mod cutoff {
        use super::*;

        #[test]
        fn test_compute_subtracts_days() {
            let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
            let cutoff = RotationCutoff::compute(now, 7).unwrap();
            assert_eq!(
                cutoff.timestamp(),
                Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()
            );
        }

        #[test]
        fn test_compute_out_of_range_is_none() {
            let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
            assert!(RotationCutoff::compute(now, 100_000_000).is_none());
            assert!(RotationCutoff::compute(now, u32::MAX).is_none());
        }

        #[test]
        fn test_oldest_allowed_is_zero_padded() {
            let cutoff = RotationCutoff::at(Utc.with_ymd_and_hms(2024, 1, 5, 3, 7, 59).unwrap());
            assert_eq!(cutoff.oldest_allowed_replica("db-1"), "db-1-2024-01-05-03-07");
        }

        #[test]
        fn test_string_order_matches_time_order() {
            let earlier = RotationCutoff::at(Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 0).unwrap());
            let later = RotationCutoff::at(Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap());
            assert!(earlier.oldest_allowed_replica("db") < later.oldest_allowed_replica("db"));
        }
    }

    mod snapshot {
        use super::*;

        #[test]
        fn test_source_region_strips_zone_letter() {
            assert_eq!(snapshot_at("us-east-1a", None).source_region(), "us-east-1");
            assert_eq!(snapshot_at("eu-west-2c", None).source_region(), "eu-west-2");
        }

        #[test]
        fn test_source_region_without_zone_letter() {
            assert_eq!(snapshot_at("us-east-1", None).source_region(), "us-east-1");
        }

        #[test]
        fn test_age_hours_has_sub_hour_precision() {
            let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
            let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap();
            let age = snapshot_at("us-east-1a", Some(created)).age_hours(now).unwrap();
            assert!((age - 2.5).abs() < 1e-9);
        }

        #[test]
        fn test_age_hours_without_creation_time() {
            let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap();
            assert!(snapshot_at("us-east-1a", None).age_hours(now).is_none());
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn test_status_parse() {
            assert_eq!(SnapshotStatus::parse("available"), SnapshotStatus::Available);
            assert_eq!(SnapshotStatus::parse("creating"), SnapshotStatus::Creating);
            assert_eq!(
                SnapshotStatus::parse("deleting"),
                SnapshotStatus::Other("deleting".to_string())
            );
        }

        #[test]
        fn test_type_parse() {
            assert_eq!(SnapshotType::parse("automated"), Some(SnapshotType::Automated));
            assert_eq!(SnapshotType::parse("manual"), Some(SnapshotType::Manual));
            assert_eq!(SnapshotType::parse("shared"), None);
            assert_eq!(SnapshotType::Manual.as_api_str(), "manual");
        }

        #[test]
        fn test_backups_enabled() {
            assert!(DatabaseInstance::new("db", 7).backups_enabled());
            assert!(!DatabaseInstance::new("db", 0).backups_enabled());
        }
    }
}
