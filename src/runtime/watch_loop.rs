//! # Watch Loop
//!
//! Controller watch loop that monitors CachedCertificate resources and the
//! secrets they own, and triggers reconciliation when changes are detected.

use crate::constants::WATCH_TIMEOUT_SECS;
use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use crate::crd::CachedCertificate;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::controller::{self, Action};
use kube::runtime::{watcher, Controller};
use kube::ResourceExt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Run the controller watch loop
///
/// Reconciles every CachedCertificate on change and whenever a secret it owns
/// changes. Restarts the controller when its stream ends until shutdown is
/// requested.
pub async fn run_watch_loop(
    requests: Api<CachedCertificate>,
    owned_secrets: Api<Secret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_min_secs = reconciler.config.backoff_min_secs;
    let backoff_max_secs = reconciler.config.backoff_max_secs;
    let watch_restart_delay = reconciler.config.watch_restart_delay();
    let backoff_secs = Arc::new(AtomicU64::new(backoff_min_secs));

    // SIGTERM/SIGINT: stop reporting ready while in-flight reconciliations finish
    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.mark_not_ready();
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = backoff_secs.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        Controller::new(requests.clone(), config.clone())
            .owns(owned_secrets.clone(), config)
            .shutdown_on_signal()
            .run(
                reconcile_with_logging,
                handle_reconciliation_error,
                reconciler.clone(),
            )
            .filter_map(move |x| {
                let backoff = backoff.clone();
                async move {
                    match &x {
                        Ok((object, action)) => {
                            backoff.store(backoff_min_secs, std::sync::atomic::Ordering::Relaxed);
                            debug!(resource = %object, action = ?action, "watch.event.success");
                            Some(x)
                        }
                        // Already handled by the error policy
                        Err(controller::Error::ReconcilerFailed(..)) => Some(x),
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                backoff_max_secs,
                                watch_restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            watch_restart_delay.as_secs()
        );
        tokio::time::sleep(watch_restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

async fn reconcile_with_logging(
    obj: Arc<CachedCertificate>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let resource_version = obj.resource_version().unwrap_or_default();
    debug!(
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.version = resource_version.as_str(),
        "watch.event.received"
    );

    let result = reconcile(obj, ctx).await;
    match &result {
        Ok(action) => {
            debug!(resource.name = name.as_str(), action = ?action, "watch.event.reconciled");
        }
        Err(e) => {
            error!(resource.name = name.as_str(), error = %e, "watch.event.reconciliation_failed");
        }
    }
    result
}
