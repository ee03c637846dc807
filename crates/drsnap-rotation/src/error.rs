//! Error types for the snapshot rotation engine.

use thiserror::Error;

/// Vendor error code for a snapshot that does not exist.
pub const CODE_SNAPSHOT_NOT_FOUND: &str = "DBSnapshotNotFound";
/// Vendor error code for an instance that does not exist.
pub const CODE_INSTANCE_NOT_FOUND: &str = "DBInstanceNotFound";
/// Vendor error code returned when the snapshot quota is exhausted.
pub const CODE_SNAPSHOT_QUOTA_EXCEEDED: &str = "SnapshotQuotaExceeded";

/// Failure reported by the database service collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The addressed resource does not exist.
    #[error("{code}: {message}")]
    NotFound {
        /// Vendor error code.
        code: String,
        /// Vendor error message.
        message: String,
    },

    /// The account snapshot quota is exhausted.
    #[error("{code}: {message}")]
    QuotaExceeded {
        /// Vendor error code.
        code: String,
        /// Vendor error message.
        message: String,
    },

    /// Any other API failure (throttling, permissions, transport).
    #[error("{code}: {message}")]
    Api {
        /// Vendor error code, `Unknown` when the service returned none.
        code: String,
        /// Vendor error message.
        message: String,
    },
}

impl ServiceError {
    /// Classify a vendor error code.
    pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some(c @ (CODE_SNAPSHOT_NOT_FOUND | CODE_INSTANCE_NOT_FOUND)) => Self::NotFound {
                code: c.to_string(),
                message,
            },
            Some(c @ CODE_SNAPSHOT_QUOTA_EXCEEDED) => Self::QuotaExceeded {
                code: c.to_string(),
                message,
            },
            Some(c) => Self::Api {
                code: c.to_string(),
                message,
            },
            None => Self::Api {
                code: "Unknown".to_string(),
                message,
            },
        }
    }

    /// Shorthand for a snapshot-not-found error.
    pub fn snapshot_not_found(snapshot_id: &str) -> Self {
        Self::NotFound {
            code: CODE_SNAPSHOT_NOT_FOUND.to_string(),
            message: format!("DBSnapshot {} not found.", snapshot_id),
        }
    }

    /// Shorthand for a quota-exceeded error.
    pub fn quota_exceeded() -> Self {
        Self::QuotaExceeded {
            code: CODE_SNAPSHOT_QUOTA_EXCEEDED.to_string(),
            message: "Cannot create more than 100 manual snapshots".to_string(),
        }
    }

    /// Returns true for the "does not exist" class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for the quota-exhaustion class.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// The vendor error code.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound { code, .. } | Self::QuotaExceeded { code, .. } | Self::Api { code, .. } => {
                code
            }
        }
    }
}

/// Errors produced by the rotation engine.
#[derive(Debug, Clone, Error)]
pub enum RotationError {
    /// Listing the source-region instance catalog failed (possibly mid-pagination).
    #[error("instance catalog unavailable: {source}")]
    CatalogUnavailable {
        /// Underlying service failure.
        source: ServiceError,
    },

    /// Listing snapshots for an instance failed.
    #[error("snapshot inventory unavailable for {instance_id}: {source}")]
    InventoryUnavailable {
        /// Instance whose snapshots were being listed.
        instance_id: String,
        /// Underlying service failure.
        source: ServiceError,
    },

    /// Destination existence probe failed with something other than "not found".
    #[error("existence probe failed for {snapshot_id}: {source}")]
    ProbeError {
        /// Replica identifier that was probed.
        snapshot_id: String,
        /// Underlying service failure.
        source: ServiceError,
    },

    /// The cross-region copy failed for a reason other than quota exhaustion.
    #[error("copy failed for {snapshot_id}: {msg}")]
    CopyError {
        /// Replica identifier being created.
        snapshot_id: String,
        /// Failure description.
        msg: String,
    },

    /// Deleting an expired replica failed.
    #[error("delete failed for {snapshot_id}: {source}")]
    DeleteError {
        /// Replica identifier being deleted.
        snapshot_id: String,
        /// Underlying service failure.
        source: ServiceError,
    },

    /// The retention window reaches outside the representable date range.
    #[error("retention window of {days} day(s) is out of range")]
    RetentionOutOfRange {
        /// Configured retention window.
        days: u32,
    },

    /// One or more instance pipelines failed.
    #[error("{} instance(s) failed rotation ({}); first error: {first}", .failed.len(), .failed.join(", "))]
    InstancesFailed {
        /// Identifiers of the failed instances.
        failed: Vec<String>,
        /// First failure in catalog order.
        first: Box<RotationError>,
    },

    /// One or more trigger events failed.
    #[error("{failed} of {total} event(s) failed; first error: {first}")]
    EventsFailed {
        /// Number of failed events.
        failed: usize,
        /// Number of events in the batch.
        total: usize,
        /// First failure in batch order.
        first: Box<RotationError>,
    },
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, RotationError>;
