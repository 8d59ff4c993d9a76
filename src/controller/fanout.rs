//! # Upstream Change Fan-out
//!
//! Propagates changes of upstream secrets to the requests that depend on them.
//!
//! ## Flow
//!
//! 1. The secret watch stream feeds a [`VersionTracker`], which classifies each
//!    event as a [`SecretChange`]
//! 2. [`propagation_target`] filters changes down to real updates of
//!    cert-manager secrets in the cache namespace
//! 3. [`FanOut::propagate`] marks every dependent request `Pending`, which
//!    re-enters the request reconciler through the request watch

use crate::constants::CERTIFICATE_NAME_ANNOTATION_KEY;
use crate::controller::index::{RequestKey, UpstreamIndex};
use crate::controller::materialize::is_synced_secret;
use crate::crd::CachedCertificateState;
use crate::observability;
use crate::store::{CertificateStore, StoreError};
use futures::future::join_all;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Classified secret watch event
#[derive(Debug, Clone, PartialEq)]
pub enum SecretChange<'a> {
    /// First time this secret is seen
    Created(&'a Secret),
    /// Seen before with a different resource version
    Updated {
        secret: &'a Secret,
        previous_version: Option<String>,
    },
    /// Seen before with the same resource version (relist, resync)
    Unchanged(&'a Secret),
    Deleted(&'a Secret),
}

impl<'a> SecretChange<'a> {
    #[must_use]
    pub fn secret(&self) -> &'a Secret {
        match self {
            Self::Created(secret)
            | Self::Updated { secret, .. }
            | Self::Unchanged(secret)
            | Self::Deleted(secret) => secret,
        }
    }
}

/// Last observed resource version per secret
///
/// Watch streams only deliver the new object, so the previous version needed
/// to tell an update from a relist is kept here.
#[derive(Debug, Default)]
pub struct VersionTracker {
    versions: HashMap<(String, String), Option<String>>,
    resync_seen: Option<HashSet<(String, String)>>,
}

impl VersionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(secret: &Secret) -> (String, String) {
        (secret.namespace().unwrap_or_default(), secret.name_any())
    }

    /// Record an applied secret and classify the change
    pub fn observe<'a>(&mut self, secret: &'a Secret) -> SecretChange<'a> {
        let key = Self::key(secret);
        let version = secret.resource_version();
        if let Some(seen) = self.resync_seen.as_mut() {
            seen.insert(key.clone());
        }

        match self.versions.insert(key, version.clone()) {
            None => SecretChange::Created(secret),
            Some(previous) if previous == version => SecretChange::Unchanged(secret),
            Some(previous_version) => SecretChange::Updated {
                secret,
                previous_version,
            },
        }
    }

    /// Record a deleted secret
    pub fn forget<'a>(&mut self, secret: &'a Secret) -> SecretChange<'a> {
        self.versions.remove(&Self::key(secret));
        SecretChange::Deleted(secret)
    }

    /// Start a relist; secrets not observed before [`Self::finish_resync`] are dropped
    pub fn begin_resync(&mut self) {
        self.resync_seen = Some(HashSet::new());
    }

    pub fn finish_resync(&mut self) {
        if let Some(seen) = self.resync_seen.take() {
            self.versions.retain(|key, _| seen.contains(key));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Name of the upstream Certificate whose dependents must be refreshed, if any
///
/// Only updates that changed the resource version of an unmanaged secret in
/// the cache namespace that names its Certificate qualify. Creations,
/// deletions and relists never do.
#[must_use]
pub fn propagation_target<'a>(change: &SecretChange<'a>, cache_namespace: &str) -> Option<&'a str> {
    let SecretChange::Updated {
        secret,
        previous_version,
    } = change
    else {
        return None;
    };

    if previous_version.as_deref() == secret.metadata.resource_version.as_deref() {
        return None;
    }
    if secret.metadata.namespace.as_deref() != Some(cache_namespace) {
        return None;
    }
    if is_synced_secret(secret) {
        return None;
    }

    secret
        .metadata
        .annotations
        .as_ref()?
        .get(CERTIFICATE_NAME_ANNOTATION_KEY)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// Outcome of one propagation round
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Dependents moved to Pending
    pub marked: Vec<RequestKey>,
    /// Dependents already Pending, deleted, or no longer referencing the upstream
    pub skipped: Vec<RequestKey>,
    /// Dependents whose update failed
    pub failed: Vec<(RequestKey, StoreError)>,
}

impl FanOutReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Marked,
    Skipped,
}

/// Marks dependents of an upstream Certificate `Pending`
#[derive(Clone)]
pub struct FanOut {
    store: Arc<dyn CertificateStore>,
    index: UpstreamIndex,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("indexed_requests", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl FanOut {
    pub fn new(store: Arc<dyn CertificateStore>, index: UpstreamIndex) -> Self {
        Self { store, index }
    }

    /// Mark every current dependent of `upstream` Pending
    ///
    /// Dependents are updated concurrently and independently; one failure does
    /// not stop the others.
    pub async fn propagate(&self, upstream: &str) -> FanOutReport {
        let dependents = self.index.dependents(upstream);
        debug!(
            upstream,
            dependents = dependents.len(),
            "Propagating upstream secret change"
        );
        self.propagate_to(upstream, dependents).await
    }

    /// [`Self::propagate`] restricted to the given dependents
    pub async fn propagate_to(&self, upstream: &str, dependents: Vec<RequestKey>) -> FanOutReport {
        let results = join_all(dependents.into_iter().map(|key| async move {
            let result = self.mark_pending(upstream, &key).await;
            (key, result)
        }))
        .await;

        let mut report = FanOutReport::default();
        for (key, result) in results {
            match result {
                Ok(Outcome::Marked) => {
                    observability::increment_fanout_marks();
                    report.marked.push(key);
                }
                Ok(Outcome::Skipped) => report.skipped.push(key),
                Err(e) => {
                    observability::increment_fanout_failures();
                    report.failed.push((key, e));
                }
            }
        }
        report
    }

    /// Propagate, retrying failed dependents after `retry_delay`
    ///
    /// Gives up after `max_attempts` rounds; the returned report holds the
    /// failures of the last round.
    pub async fn propagate_with_retry(
        &self,
        upstream: &str,
        retry_delay: Duration,
        max_attempts: u32,
    ) -> FanOutReport {
        let mut report = self.propagate(upstream).await;
        let mut attempt = 1;

        while !report.failed.is_empty() && attempt < max_attempts {
            warn!(
                upstream,
                failed = report.failed.len(),
                attempt,
                "Failed to mark dependents Pending, retrying in {:?}",
                retry_delay
            );
            tokio::time::sleep(retry_delay).await;

            let retry: Vec<RequestKey> = report.failed.drain(..).map(|(key, _)| key).collect();
            let next = self.propagate_to(upstream, retry).await;
            report.marked.extend(next.marked);
            report.skipped.extend(next.skipped);
            report.failed = next.failed;
            attempt += 1;
        }

        if report.is_complete() {
            info!(
                upstream,
                marked = report.marked.len(),
                skipped = report.skipped.len(),
                "Upstream secret change propagated"
            );
        } else {
            for (key, e) in &report.failed {
                warn!(
                    upstream,
                    request = %key,
                    "Giving up marking dependent Pending after {} attempts: {}",
                    max_attempts,
                    e
                );
            }
        }
        report
    }

    async fn mark_pending(&self, upstream: &str, key: &RequestKey) -> Result<Outcome, StoreError> {
        let request = match self.store.get_request(key).await {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                self.index.forget(key);
                return Ok(Outcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let status = request.status.clone().unwrap_or_default();
        let still_dependent = status
            .upstream_ref
            .as_ref()
            .is_some_and(|r| r.name == upstream);
        if !still_dependent {
            self.index.observe(&request);
            return Ok(Outcome::Skipped);
        }
        if status.state == CachedCertificateState::Pending {
            return Ok(Outcome::Skipped);
        }

        self.store
            .patch_request_state(key, CachedCertificateState::Pending)
            .await?;
        debug!(request = %key, upstream, "Marked dependent Pending");
        Ok(Outcome::Marked)
    }
}
