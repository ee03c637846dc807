//! In-process implementations of the collaborator traits.
//!
//! [`MemoryRds`] holds both regions in memory, paginates like the real
//! service, journals every call and can be told to fail specific calls.
//! [`RecordingNotifier`] keeps every notification it was asked to send.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;

use crate::error::{ServiceError, CODE_INSTANCE_NOT_FOUND};
use crate::model::{
    DatabaseInstance, Page, RegionRole, Snapshot, SnapshotStatus, SnapshotType,
    DEFAULT_REPLICA_PREFIX, REPLICA_TIMESTAMP_FORMAT,
};
use crate::notify::{Notifier, NotifyError};
use crate::service::{CopyRequest, RdsApi, ServiceResult, SnapshotQuery};

/// Number of calls made per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    /// Instance listing pages requested.
    pub describe_instances: usize,
    /// Snapshot listing pages requested.
    pub describe_snapshots: usize,
    /// Single-snapshot lookups.
    pub describe_snapshot: usize,
    /// Copy requests issued (including failed ones).
    pub copy_snapshot: usize,
    /// Delete requests issued (including failed ones).
    pub delete_snapshot: usize,
}

impl CallLog {
    /// Total number of calls after the instance listing.
    pub fn snapshot_calls(&self) -> usize {
        self.describe_snapshots + self.describe_snapshot + self.copy_snapshot + self.delete_snapshot
    }
}

#[derive(Default)]
struct State {
    instances: Vec<DatabaseInstance>,
    source: Vec<Snapshot>,
    destination: Vec<Snapshot>,
    failing_instance_page: Option<usize>,
    instance_page: usize,
    failing_listings: HashSet<String>,
    failing_probes: HashSet<String>,
    failing_copies: HashSet<String>,
    quota_copies: HashSet<String>,
    failing_deletes: HashSet<String>,
    calls: CallLog,
    copy_requests: Vec<CopyRequest>,
    delete_requests: Vec<(RegionRole, String)>,
}

impl State {
    fn region(&self, region: RegionRole) -> &Vec<Snapshot> {
        match region {
            RegionRole::Source => &self.source,
            RegionRole::Destination => &self.destination,
        }
    }

    fn region_mut(&mut self, region: RegionRole) -> &mut Vec<Snapshot> {
        match region {
            RegionRole::Source => &mut self.source,
            RegionRole::Destination => &mut self.destination,
        }
    }
}

fn throttled(what: &str) -> ServiceError {
    ServiceError::Api {
        code: "Throttling".to_string(),
        message: format!("Rate exceeded ({})", what),
    }
}

fn page_of<T: Clone>(items: &[T], marker: Option<&str>, page_size: usize) -> ServiceResult<Page<T>> {
    let start = match marker {
        None => 0,
        Some(m) => m.parse::<usize>().map_err(|_| ServiceError::Api {
            code: "InvalidParameterValue".to_string(),
            message: format!("bad marker {}", m),
        })?,
    };
    let end = (start + page_size).min(items.len());
    let marker = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: items[start.min(end)..end].to_vec(),
        marker,
    })
}

/// In-memory two-region database service.
pub struct MemoryRds {
    page_size: usize,
    state: Mutex<State>,
}

impl Default for MemoryRds {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRds {
    /// Empty service returning up to 100 items per page.
    pub fn new() -> Self {
        Self {
            page_size: 100,
            state: Mutex::new(State::default()),
        }
    }

    /// Set the listing page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Register a source-region instance.
    pub async fn add_instance(&self, instance: DatabaseInstance) {
        self.state.lock().await.instances.push(instance);
    }

    /// Store a snapshot in a region.
    pub async fn add_snapshot(&self, region: RegionRole, snapshot: Snapshot) {
        self.state.lock().await.region_mut(region).push(snapshot);
    }

    /// Snapshots currently stored in a region.
    pub async fn snapshots_in(&self, region: RegionRole) -> Vec<Snapshot> {
        self.state.lock().await.region(region).clone()
    }

    /// Identifiers of snapshots currently stored in a region, sorted.
    pub async fn snapshot_ids(&self, region: RegionRole) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .await
            .region(region)
            .iter()
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Fail the instance listing page with this zero-based index, counted
    /// within each listing. A request without a marker starts a new listing.
    pub async fn fail_instance_page(&self, page: usize) {
        self.state.lock().await.failing_instance_page = Some(page);
    }

    /// Fail every snapshot listing for an instance, in both regions.
    pub async fn fail_snapshot_listing(&self, instance_id: &str) {
        self.state
            .lock()
            .await
            .failing_listings
            .insert(instance_id.to_string());
    }

    /// Fail destination lookups of this identifier with a non-"not found" error.
    pub async fn fail_probe(&self, snapshot_id: &str) {
        self.state
            .lock()
            .await
            .failing_probes
            .insert(snapshot_id.to_string());
    }

    /// Fail copies targeting this identifier.
    pub async fn fail_copy(&self, target_snapshot_id: &str) {
        self.state
            .lock()
            .await
            .failing_copies
            .insert(target_snapshot_id.to_string());
    }

    /// Reject copies targeting this identifier with a quota error.
    pub async fn exhaust_quota_for(&self, target_snapshot_id: &str) {
        self.state
            .lock()
            .await
            .quota_copies
            .insert(target_snapshot_id.to_string());
    }

    /// Fail deletion of this identifier.
    pub async fn fail_delete(&self, snapshot_id: &str) {
        self.state
            .lock()
            .await
            .failing_deletes
            .insert(snapshot_id.to_string());
    }

    /// Call counters so far.
    pub async fn calls(&self) -> CallLog {
        self.state.lock().await.calls.clone()
    }

    /// Every copy request received, in arrival order.
    pub async fn copy_requests(&self) -> Vec<CopyRequest> {
        self.state.lock().await.copy_requests.clone()
    }

    /// Every delete request received, in arrival order.
    pub async fn delete_requests(&self) -> Vec<(RegionRole, String)> {
        self.state.lock().await.delete_requests.clone()
    }
}

#[async_trait]
impl RdsApi for MemoryRds {
    async fn describe_instances(
        &self,
        instance_id: Option<&str>,
        marker: Option<String>,
    ) -> ServiceResult<Page<DatabaseInstance>> {
        let mut state = self.state.lock().await;
        state.calls.describe_instances += 1;
        if marker.is_none() {
            state.instance_page = 0;
        }
        let page_index = state.instance_page;
        state.instance_page += 1;
        if state.failing_instance_page == Some(page_index) {
            return Err(throttled("DescribeDBInstances"));
        }
        let matching: Vec<DatabaseInstance> = state
            .instances
            .iter()
            .filter(|i| instance_id.map_or(true, |id| i.id == id))
            .cloned()
            .collect();
        if let Some(id) = instance_id {
            if matching.is_empty() {
                return Err(ServiceError::from_code(
                    Some(CODE_INSTANCE_NOT_FOUND),
                    format!("DBInstance {} not found.", id),
                ));
            }
        }
        page_of(&matching, marker.as_deref(), self.page_size)
    }

    async fn describe_snapshots(
        &self,
        region: RegionRole,
        query: &SnapshotQuery,
        marker: Option<String>,
    ) -> ServiceResult<Page<Snapshot>> {
        let mut state = self.state.lock().await;
        state.calls.describe_snapshots += 1;
        if state.failing_listings.contains(&query.instance_id) {
            return Err(throttled("DescribeDBSnapshots"));
        }
        let matching: Vec<Snapshot> = state
            .region(region)
            .iter()
            .filter(|s| s.instance_id == query.instance_id && s.snapshot_type == query.snapshot_type)
            .cloned()
            .collect();
        page_of(&matching, marker.as_deref(), self.page_size)
    }

    async fn describe_snapshot(&self, region: RegionRole, snapshot_id: &str) -> ServiceResult<Snapshot> {
        let mut state = self.state.lock().await;
        state.calls.describe_snapshot += 1;
        if region == RegionRole::Destination && state.failing_probes.contains(snapshot_id) {
            return Err(throttled("DescribeDBSnapshots"));
        }
        state
            .region(region)
            .iter()
            .find(|s| s.id == snapshot_id)
            .cloned()
            .ok_or_else(|| ServiceError::snapshot_not_found(snapshot_id))
    }

    async fn copy_snapshot(&self, request: &CopyRequest) -> ServiceResult<()> {
        let mut state = self.state.lock().await;
        state.calls.copy_snapshot += 1;
        state.copy_requests.push(request.clone());

        if state.quota_copies.contains(&request.target_snapshot_id) {
            return Err(ServiceError::quota_exceeded());
        }
        if state.failing_copies.contains(&request.target_snapshot_id) {
            return Err(ServiceError::Api {
                code: "KMSKeyNotAccessibleFault".to_string(),
                message: "The specified KMS key is not accessible".to_string(),
            });
        }
        if state
            .destination
            .iter()
            .any(|s| s.id == request.target_snapshot_id)
        {
            return Err(ServiceError::Api {
                code: "DBSnapshotAlreadyExists".to_string(),
                message: format!("{} already exists", request.target_snapshot_id),
            });
        }
        let source = state
            .source
            .iter()
            .find(|s| s.source_ref == request.source_snapshot_ref)
            .cloned()
            .ok_or_else(|| ServiceError::snapshot_not_found(&request.source_snapshot_ref))?;

        state.destination.push(Snapshot {
            id: request.target_snapshot_id.clone(),
            instance_id: source.instance_id,
            source_ref: format!("arn:memory:dr:snapshot:{}", request.target_snapshot_id),
            created_at: source.created_at,
            status: SnapshotStatus::Creating,
            encrypted: request.kms_key_id.is_some(),
            availability_zone: String::new(),
            snapshot_type: SnapshotType::Manual,
        });
        Ok(())
    }

    async fn delete_snapshot(&self, region: RegionRole, snapshot_id: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().await;
        state.calls.delete_snapshot += 1;
        state
            .delete_requests
            .push((region, snapshot_id.to_string()));
        if state.failing_deletes.contains(snapshot_id) {
            return Err(ServiceError::Api {
                code: "InvalidDBSnapshotState".to_string(),
                message: format!("{} is not in available state", snapshot_id),
            });
        }
        let snapshots = state.region_mut(region);
        let before = snapshots.len();
        snapshots.retain(|s| s.id != snapshot_id);
        if snapshots.len() == before {
            return Err(ServiceError::snapshot_not_found(snapshot_id));
        }
        Ok(())
    }
}

/// Builder for test and demo snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    /// An available automated snapshot of `instance_id` named after `timestamp`
    /// (`YYYY-MM-DD-HH-MM`), created at that time.
    pub fn automated(instance_id: &str, timestamp: &str) -> Self {
        let id = format!("{}{}-{}", DEFAULT_REPLICA_PREFIX, instance_id, timestamp);
        let created_at = NaiveDateTime::parse_from_str(timestamp, REPLICA_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc());
        Self {
            snapshot: Snapshot {
                source_ref: format!("arn:aws:rds:us-east-1:000000000000:snapshot:{}", id),
                id,
                instance_id: instance_id.to_string(),
                created_at,
                status: SnapshotStatus::Available,
                encrypted: false,
                availability_zone: "us-east-1a".to_string(),
                snapshot_type: SnapshotType::Automated,
            },
        }
    }

    /// An available manual snapshot with an explicit identifier.
    pub fn manual(instance_id: &str, snapshot_id: &str) -> Self {
        Self {
            snapshot: Snapshot {
                id: snapshot_id.to_string(),
                instance_id: instance_id.to_string(),
                source_ref: format!("arn:aws:rds:us-west-2:000000000000:snapshot:{}", snapshot_id),
                created_at: None,
                status: SnapshotStatus::Available,
                encrypted: false,
                availability_zone: "us-west-2b".to_string(),
                snapshot_type: SnapshotType::Manual,
            },
        }
    }

    /// Override the creation time.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.snapshot.created_at = Some(created_at);
        self
    }

    /// Override the status.
    pub fn status(mut self, status: SnapshotStatus) -> Self {
        self.snapshot.status = status;
        self
    }

    /// Mark the snapshot encrypted.
    pub fn encrypted(mut self) -> Self {
        self.snapshot.encrypted = true;
        self
    }

    /// Override the availability zone.
    pub fn availability_zone(mut self, az: &str) -> Self {
        self.snapshot.availability_zone = az.to_string();
        self
    }

    /// Finish.
    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}

/// Notifier that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: bool,
}

impl RecordingNotifier {
    /// A notifier that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails (after recording the attempt).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// All `(destination, text)` pairs sent so far.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    /// Messages sent to one destination.
    pub async fn sent_to(&self, destination: &str) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .await
            .push((destination.to_string(), text.to_string()));
        if self.failing {
            return Err(NotifyError::Rejected {
                status: 500,
                body: "recording notifier set to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// Captures formatted log lines for the current thread.
#[cfg(test)]
pub(crate) mod log_capture {
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::DefaultGuard;

    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        /// Captured lines containing `needle`.
        pub(crate) fn lines_with(&self, needle: &str) -> Vec<String> {
            self.contents()
                .lines()
                .filter(|l| l.contains(needle))
                .map(str::to_string)
                .collect()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Install a capturing subscriber until the guard drops.
    pub(crate) fn capture() -> (CapturedLogs, DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }
}
