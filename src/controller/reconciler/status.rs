//! # Status Updates
//!
//! Writes `CachedCertificate` status, skipping writes that would not change anything.

use crate::controller::reconciler::types::Reconciler;
use crate::crd::{CachedCertificate, CachedCertificateState, CachedCertificateStatus};
use crate::observability;
use crate::store::StoreError;
use tracing::{debug, warn};

/// Persist `status` for `request`, replacing `request` with the stored object
///
/// The write carries the request's resource version, so a concurrent change
/// fails with a conflict and the whole pass is retried. Returns whether a
/// write happened.
pub async fn persist_status(
    ctx: &Reconciler,
    request: &mut CachedCertificate,
    status: &CachedCertificateStatus,
) -> Result<bool, StoreError> {
    let current = request.status.clone().unwrap_or_default();
    if &current == status {
        debug!(
            state = %status.state,
            upstream_ready = status.upstream_ready,
            "Skipping status update - status unchanged"
        );
        return Ok(false);
    }

    let updated = ctx.store.update_request_status(request, status).await?;
    ctx.index.observe(&updated);
    observability::set_indexed_requests(ctx.index.len());
    debug!(
        state = %status.state,
        upstream_ready = status.upstream_ready,
        upstream = status.upstream_ref.as_ref().map(|r| r.name.as_str()).unwrap_or(""),
        "Status updated"
    );
    *request = updated;
    Ok(true)
}

/// Record the Error state, logging instead of failing when the write is refused
///
/// Used on paths that are already returning a failure; that failure is the one
/// reported to the error policy.
pub async fn mark_error(
    ctx: &Reconciler,
    request: &mut CachedCertificate,
    status: &mut CachedCertificateStatus,
    clear_ready: bool,
) {
    status.state = CachedCertificateState::Error;
    if clear_ready {
        status.upstream_ready = false;
    }
    if let Err(e) = persist_status(ctx, request, status).await {
        warn!("Failed to record Error state: {}", e);
    }
}
