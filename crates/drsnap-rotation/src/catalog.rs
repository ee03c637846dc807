//! Instance catalog reader.
//!
//! Lists source-region database instances page by page and decides which of
//! them the engine is allowed to touch.

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use regex::Regex;
use std::future::Future;
use tracing::debug;

use crate::config::{ConfigError, RotationConfig};
use crate::error::{Result, RotationError, ServiceError};
use crate::model::{DatabaseInstance, Page};
use crate::service::{RdsApi, ServiceResult};

/// Which instances an invocation rotates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceScope {
    /// Every instance in the source region.
    All,
    /// A single instance, by identifier.
    One(String),
}

/// Instance name filter. Unanchored regex search; no pattern matches everything.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pattern: Option<Regex>,
}

impl InstanceFilter {
    /// Compile a filter from an optional pattern.
    pub fn new(pattern: Option<&str>) -> std::result::Result<Self, regex::Error> {
        let pattern = pattern.map(Regex::new).transpose()?;
        Ok(Self { pattern })
    }

    /// Compile the filter configured for this deployment.
    pub fn from_config(config: &RotationConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(config.instance_filter.as_deref()).map_err(|e| ConfigError::Invalid {
            key: "DATABASE_INSTANCE_FILTER",
            msg: e.to_string(),
        })
    }

    /// Returns true if the instance identifier passes the filter.
    pub fn matches(&self, instance_id: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(instance_id),
            None => true,
        }
    }
}

/// Turn a single-page fetch into a lazy stream of items.
///
/// `fetch` receives the marker of the page to load (None for the first page).
/// A failing page ends the stream with that error; items from earlier pages
/// have already been yielded.
pub(crate) fn paginate<T, F, Fut>(mut fetch: F) -> impl Stream<Item = ServiceResult<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ServiceResult<Page<T>>>,
{
    // None: done. Some(marker): fetch the page at `marker`.
    stream::try_unfold(Some(None::<String>), move |state| {
        let pending = state.map(&mut fetch);
        async move {
            match pending {
                None => Ok::<_, ServiceError>(None),
                Some(pending) => {
                    let page = pending.await?;
                    Ok(Some((page.items, page.marker.map(Some))))
                }
            }
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}

/// Lazily list source-region instances for a scope.
pub fn instances<'a>(
    api: &'a dyn RdsApi,
    scope: &'a InstanceScope,
) -> impl Stream<Item = ServiceResult<DatabaseInstance>> + 'a {
    let instance_id = match scope {
        InstanceScope::All => None,
        InstanceScope::One(id) => Some(id.as_str()),
    };
    paginate(move |marker| api.describe_instances(instance_id, marker))
}

/// List every instance in scope.
///
/// Any listing failure, including one after the first page, fails the whole
/// listing with [`RotationError::CatalogUnavailable`]. A single-instance scope
/// naming an unknown instance yields an empty list.
pub async fn list_instances(api: &dyn RdsApi, scope: &InstanceScope) -> Result<Vec<DatabaseInstance>> {
    let mut listed = Vec::new();
    let mut pages = Box::pin(instances(api, scope));
    while let Some(item) = pages.next().await {
        match item {
            Ok(instance) => listed.push(instance),
            Err(ServiceError::NotFound { .. }) if matches!(scope, InstanceScope::One(_)) => {
                debug!(?scope, "instance not present in catalog");
                return Ok(Vec::new());
            }
            Err(source) => return Err(RotationError::CatalogUnavailable { source }),
        }
    }
    Ok(listed)
}
