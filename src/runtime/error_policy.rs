//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::index::RequestKey;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::CachedCertificate;
use crate::observability;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing request does not slow
/// down the others. The state is reset by the reconciler after a successful pass.
pub fn handle_reconciliation_error(
    obj: Arc<CachedCertificate>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error.kind = error.kind(),
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    observability::increment_reconciliation_errors();

    let key = RequestKey::new(namespace, name);
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using maximum backoff", e);
            (ctx.config.backoff_max_secs, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or_default());
    info!(
        "Retrying in {}s (error count: {}, next attempt at {})",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Classification of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    TooManyRequests,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify a rendered watch error
    ///
    /// 404 is checked first since a plain-text 404 body surfaces as a decode
    /// error that also mentions the failed watch.
    #[must_use]
    pub fn classify(error_string: &str) -> Self {
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        if is_not_found {
            Self::NotFound
        } else if error_string.contains("401") || error_string.contains("Unauthorized") {
            Self::Unauthorized
        } else if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            Self::Expired
        } else if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            Self::TooManyRequests
        } else {
            Self::Other
        }
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to drop the error from the stream or `Some(())` to keep it.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff_secs: &Arc<AtomicU64>,
    max_backoff_secs: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    async move {
        match WatchErrorKind::classify(error_string) {
            WatchErrorKind::Unauthorized => {
                error!("Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("Verify the ClusterRole grants list/watch on cachedcertificates, certificates and secrets:");
                error!("  kubectl auth can-i watch cachedcertificates.cache.weavelab.xyz --all-namespaces");
                warn!(
                    "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                    watch_restart_delay.as_secs()
                );
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
            WatchErrorKind::Expired => {
                warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
                None
            }
            WatchErrorKind::TooManyRequests => {
                let current = backoff_secs.load(Ordering::Relaxed);
                warn!(
                    "API server storage reinitializing (429), backing off for {}s...",
                    current
                );
                tokio::time::sleep(Duration::from_secs(current)).await;
                let next = current.saturating_mul(2).min(max_backoff_secs);
                backoff_secs.store(next, Ordering::Relaxed);
                None
            }
            WatchErrorKind::NotFound => {
                warn!(
                    "Resource not found (404) - this may be normal if it was deleted or the CRD is missing. Error: {}",
                    error_string
                );
                Some(())
            }
            WatchErrorKind::Other => {
                error!("Controller stream error: {}", error_string);
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
        }
    }
    .instrument(error_span)
    .await
}
