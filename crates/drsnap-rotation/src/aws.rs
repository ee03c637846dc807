//! Amazon RDS backend.
//!
//! Two SDK clients: one for the source region (instances and automated
//! snapshots), one for the DR region (probes, copies, retention).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_rds::config::Region;
use aws_sdk_rds::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_rds::types::{DbInstance, DbSnapshot};
use aws_sdk_rds::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RotationConfig;
use crate::error::ServiceError;
use crate::model::{DatabaseInstance, Page, RegionRole, Snapshot, SnapshotStatus, SnapshotType};
use crate::service::{CopyRequest, RdsApi, ServiceResult, SnapshotQuery};

/// RDS over the AWS SDK.
pub struct AwsRds {
    source: Client,
    destination: Client,
}

impl AwsRds {
    /// Build clients from the default credential chain. The source region
    /// falls back to the ambient SDK region when not given.
    pub async fn connect(source_region: Option<&str>, dr_region: &str) -> Self {
        let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;

        let mut source = aws_sdk_rds::config::Builder::from(&shared);
        if let Some(region) = source_region {
            source = source.region(Region::new(region.to_string()));
        }
        let destination =
            aws_sdk_rds::config::Builder::from(&shared).region(Region::new(dr_region.to_string()));

        debug!(?source_region, dr_region, "connected RDS clients");
        Self {
            source: Client::from_conf(source.build()),
            destination: Client::from_conf(destination.build()),
        }
    }

    /// Clients for the regions named in `config`.
    pub async fn from_config(config: &RotationConfig) -> Self {
        Self::connect(config.source_region.as_deref(), &config.dr_region).await
    }

    fn client(&self, region: RegionRole) -> &Client {
        match region {
            RegionRole::Source => &self.source,
            RegionRole::Destination => &self.destination,
        }
    }
}

fn service_error<E, R>(err: SdkError<E, R>) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    ServiceError::from_code(code.as_deref(), DisplayErrorContext(&err).to_string())
}

fn timestamp(t: &aws_sdk_rds::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
}

fn to_instance(instance: &DbInstance) -> DatabaseInstance {
    DatabaseInstance::new(
        instance.db_instance_identifier().unwrap_or_default(),
        instance
            .backup_retention_period()
            .and_then(|days| u32::try_from(days).ok())
            .unwrap_or(0),
    )
}

fn to_snapshot(snapshot: &DbSnapshot) -> Snapshot {
    Snapshot {
        id: snapshot.db_snapshot_identifier().unwrap_or_default().to_string(),
        instance_id: snapshot.db_instance_identifier().unwrap_or_default().to_string(),
        source_ref: snapshot.db_snapshot_arn().unwrap_or_default().to_string(),
        created_at: snapshot.snapshot_create_time().and_then(timestamp),
        status: SnapshotStatus::parse(snapshot.status().unwrap_or_default()),
        encrypted: snapshot.encrypted().unwrap_or(false),
        availability_zone: snapshot.availability_zone().unwrap_or_default().to_string(),
        snapshot_type: snapshot
            .snapshot_type()
            .and_then(SnapshotType::parse)
            .unwrap_or(SnapshotType::Manual),
    }
}

#[async_trait]
impl RdsApi for AwsRds {
    async fn describe_instances(
        &self,
        instance_id: Option<&str>,
        marker: Option<String>,
    ) -> ServiceResult<Page<DatabaseInstance>> {
        let out = self
            .source
            .describe_db_instances()
            .set_db_instance_identifier(instance_id.map(str::to_string))
            .set_marker(marker)
            .send()
            .await
            .map_err(service_error)?;
        Ok(Page {
            items: out.db_instances().iter().map(to_instance).collect(),
            marker: out.marker().map(str::to_string),
        })
    }

    async fn describe_snapshots(
        &self,
        region: RegionRole,
        query: &SnapshotQuery,
        marker: Option<String>,
    ) -> ServiceResult<Page<Snapshot>> {
        let out = self
            .client(region)
            .describe_db_snapshots()
            .db_instance_identifier(&query.instance_id)
            .snapshot_type(query.snapshot_type.as_api_str())
            .include_shared(false)
            .include_public(false)
            .set_marker(marker)
            .send()
            .await
            .map_err(service_error)?;
        Ok(Page {
            items: out.db_snapshots().iter().map(to_snapshot).collect(),
            marker: out.marker().map(str::to_string),
        })
    }

    async fn describe_snapshot(&self, region: RegionRole, snapshot_id: &str) -> ServiceResult<Snapshot> {
        let out = self
            .client(region)
            .describe_db_snapshots()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(service_error)?;
        out.db_snapshots()
            .first()
            .map(to_snapshot)
            .ok_or_else(|| ServiceError::snapshot_not_found(snapshot_id))
    }

    async fn copy_snapshot(&self, request: &CopyRequest) -> ServiceResult<()> {
        self.destination
            .copy_db_snapshot()
            .source_db_snapshot_identifier(&request.source_snapshot_ref)
            .target_db_snapshot_identifier(&request.target_snapshot_id)
            .source_region(&request.source_region)
            .copy_tags(request.copy_tags)
            .set_kms_key_id(request.kms_key_id.clone())
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn delete_snapshot(&self, region: RegionRole, snapshot_id: &str) -> ServiceResult<()> {
        self.client(region)
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_conversion() {
        let sdk = DbSnapshot::builder()
            .db_snapshot_identifier("rds:db-a-2024-03-01-06-10")
            .db_instance_identifier("db-a")
            .db_snapshot_arn("arn:aws:rds:us-east-1:000000000000:snapshot:rds:db-a-2024-03-01-06-10")
            .snapshot_create_time(aws_sdk_rds::primitives::DateTime::from_secs(1_709_273_400))
            .status("available")
            .encrypted(true)
            .availability_zone("us-east-1c")
            .snapshot_type("automated")
            .build();

        let snap = to_snapshot(&sdk);

        assert_eq!(snap.id, "rds:db-a-2024-03-01-06-10");
        assert_eq!(snap.source_region(), "us-east-1");
        assert!(snap.is_available());
        assert!(snap.encrypted);
        assert_eq!(snap.snapshot_type, SnapshotType::Automated);
        assert_eq!(
            snap.created_at.map(|t| t.timestamp()),
            Some(1_709_273_400)
        );
    }

    #[test]
    fn test_instance_conversion() {
        let sdk = DbInstance::builder()
            .db_instance_identifier("db-a")
            .backup_retention_period(0)
            .build();
        let instance = to_instance(&sdk);
        assert_eq!(instance.id, "db-a");
        assert!(!instance.backups_enabled());
    }
}
