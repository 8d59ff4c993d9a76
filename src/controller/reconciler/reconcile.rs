//! # Reconcile
//!
//! One pass of the CachedCertificate state machine.
//!
//! A pass walks from the request to its upstream Certificate, waits for the
//! upstream secret to be issued and copies it into the request namespace.
//! Every status write is skipped when nothing changed and carries the
//! request's resource version.

use crate::controller::index::RequestKey;
use crate::controller::materialize::{
    is_up_to_date, validate_secret, MaterializeError, TargetSecretBuilder, UpsertPlan,
};
use crate::controller::naming::{dns_names_match, upstream_certificate_name};
use crate::controller::reconciler::status::{mark_error, persist_status};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{CachedCertificate, CachedCertificateState, ObjectReference, UpstreamCertificate};
use crate::observability;
use crate::store::StoreError;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Reconcile one CachedCertificate
///
/// The object handed in by the controller may be stale, so the request is
/// re-read from the store first. A request that no longer exists is a no-op.
pub async fn reconcile(
    request: Arc<CachedCertificate>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = RequestKey::from_request(&request).ok_or(ReconcilerError::MissingObjectKey)?;
    let span = info_span!(
        "reconcile",
        resource.name = %key.name,
        resource.namespace = %key.namespace,
    );

    let start = Instant::now();
    observability::increment_reconciliations();
    let result = reconcile_request(&key, &ctx).instrument(span).await;
    observability::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    if result.is_ok() {
        ctx.reset_backoff(&key);
    }
    result
}

async fn reconcile_request(
    key: &RequestKey,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let mut current = match ctx.store.get_request(key).await {
        Ok(request) => request,
        Err(e) if e.is_not_found() => {
            debug!("CachedCertificate no longer exists, nothing to do");
            ctx.index.forget(key);
            observability::set_indexed_requests(ctx.index.len());
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };
    let mut status = current.status.clone().unwrap_or_default();

    let upstream_ref = match status.upstream_ref.clone() {
        Some(upstream_ref) => upstream_ref,
        None => {
            let name = upstream_certificate_name(&current.spec.dns_names);
            if name.is_empty() {
                warn!("CachedCertificate has no dnsNames");
                mark_error(ctx, &mut current, &mut status, true).await;
                return Err(ReconcilerError::NoDnsNames);
            }
            let upstream_ref = ObjectReference {
                name,
                namespace: ctx.config.cache_namespace.clone(),
            };
            status.upstream_ref = Some(upstream_ref.clone());
            persist_status(ctx, &mut current, &status).await?;
            upstream_ref
        }
    };

    let upstream = match ctx
        .store
        .get_upstream(&upstream_ref.namespace, &upstream_ref.name)
        .await
    {
        Ok(upstream) => upstream,
        Err(e) if e.is_not_found() => {
            create_upstream(ctx, &current, &upstream_ref).await?;
            persist_status(ctx, &mut current, &status).await?;
            return Ok(Action::requeue(Duration::ZERO));
        }
        Err(e) => {
            warn!(upstream = %upstream_ref.name, "Failed to get upstream Certificate: {}", e);
            mark_error(ctx, &mut current, &mut status, false).await;
            return Err(e.into());
        }
    };

    let view = match UpstreamCertificate::from_dynamic(&upstream) {
        Ok(view) => view,
        Err(e) => {
            warn!(upstream = %upstream_ref.name, "Upstream Certificate is unreadable: {}", e);
            mark_error(ctx, &mut current, &mut status, false).await;
            return Err(e.into());
        }
    };

    if !dns_names_match(&view.dns_names, &current.spec.dns_names) {
        info!(
            upstream = %view.name,
            "dnsNames changed, releasing upstream Certificate"
        );
        status.state = CachedCertificateState::Pending;
        status.upstream_ready = false;
        status.upstream_ref = None;
        persist_status(ctx, &mut current, &status).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let upstream_secret = match ctx.store.get_secret(&view.namespace, &view.secret_name).await {
        Ok(secret) => secret,
        Err(e) if e.is_not_found() => {
            debug!(
                upstream = %view.name,
                secret = %view.secret_name,
                "Upstream secret not issued yet"
            );
            if status.state != CachedCertificateState::Pending || status.upstream_ready {
                status.state = CachedCertificateState::Pending;
                status.upstream_ready = false;
                persist_status(ctx, &mut current, &status).await?;
            }
            return Ok(Action::requeue(ctx.config.upstream_secret_retry()));
        }
        Err(e) => {
            warn!(upstream = %view.name, "Failed to get upstream secret: {}", e);
            mark_error(ctx, &mut current, &mut status, true).await;
            return Err(e.into());
        }
    };

    if !status.upstream_ready {
        status.upstream_ready = true;
        persist_status(ctx, &mut current, &status).await?;
    }

    let target = TargetSecretBuilder::new()
        .request(&current)
        .upstream(&view)
        .upstream_secret(&upstream_secret)
        .build()?;
    if let Err(e) = validate_secret(&target) {
        warn!(upstream = %view.name, "Upstream secret is not usable yet: {}", e);
        return Ok(Action::requeue(ctx.config.invalid_secret_retry()));
    }

    if let Err(e) = upsert_target_secret(ctx, &target).await {
        if let ReconcilerError::Materialize(MaterializeError::OwnershipConflict { .. }) = &e {
            observability::increment_ownership_conflicts();
        }
        warn!("Failed to write target secret: {}", e);
        mark_error(ctx, &mut current, &mut status, false).await;
        return Err(e);
    }

    status.state = CachedCertificateState::Synced;
    if persist_status(ctx, &mut current, &status).await? {
        info!(
            upstream = %view.name,
            secret = %target.name_any(),
            "CachedCertificate synced"
        );
    }
    Ok(Action::await_change())
}

/// Create the shared upstream Certificate
///
/// Another request with the same DNS set may win the race; that counts as
/// success.
async fn create_upstream(
    ctx: &Reconciler,
    request: &CachedCertificate,
    upstream_ref: &ObjectReference,
) -> Result<(), ReconcilerError> {
    let manifest = UpstreamCertificate::manifest(
        &upstream_ref.name,
        &upstream_ref.namespace,
        &request.spec.dns_names,
        &request.spec.issuer_ref,
    )
    .map_err(StoreError::from)?;

    match ctx.store.create_upstream(&manifest).await {
        Ok(()) => {
            info!(
                upstream = %upstream_ref.name,
                namespace = %upstream_ref.namespace,
                "Created upstream Certificate"
            );
            observability::increment_upstream_certificates_created();
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(upstream = %upstream_ref.name, "Upstream Certificate already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write the target secret according to the [`UpsertPlan`]
///
/// A managed secret that already matches is left alone.
async fn upsert_target_secret(ctx: &Reconciler, target: &Secret) -> Result<(), ReconcilerError> {
    let namespace = target.namespace().unwrap_or_default();
    let name = target.name_any();

    let existing = match ctx.store.get_secret(&namespace, &name).await {
        Ok(secret) => Some(secret),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };

    match UpsertPlan::decide(existing.as_ref())? {
        UpsertPlan::Create => {
            ctx.store.create_secret(target).await?;
            observability::increment_target_secrets_synced("create");
            debug!(secret = %name, "Created target secret");
        }
        UpsertPlan::Replace { .. }
            if existing
                .as_ref()
                .is_some_and(|existing| is_up_to_date(existing, target)) =>
        {
            debug!(secret = %name, "Target secret already up to date");
        }
        UpsertPlan::Replace { resource_version } => {
            ctx.store.replace_secret(target, resource_version).await?;
            observability::increment_target_secrets_synced("replace");
            debug!(secret = %name, "Replaced target secret");
        }
    }
    Ok(())
}
