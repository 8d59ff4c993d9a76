//! # Background Watches
//!
//! Watches that run beside the controller:
//! - the request watch keeps the [`UpstreamIndex`] current
//! - the upstream secret watch detects re-issued certificates in the cache
//!   namespace and fans the change out to dependent requests

use crate::constants::WATCH_TIMEOUT_SECS;
use crate::controller::fanout::{propagation_target, FanOut, VersionTracker};
use crate::controller::index::{RequestKey, UpstreamIndex};
use crate::crd::CachedCertificate;
use crate::observability;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Apply one request watch event to the index
pub fn apply_request_event(index: &UpstreamIndex, event: &watcher::Event<CachedCertificate>) {
    match event {
        watcher::Event::Apply(request) | watcher::Event::InitApply(request) => {
            index.observe(request);
        }
        watcher::Event::Delete(request) => {
            if let Some(key) = RequestKey::from_request(request) {
                index.forget(&key);
            }
        }
        // Requests deleted while the watch was down stay indexed until the
        // fan-out finds them missing.
        watcher::Event::Init | watcher::Event::InitDone => {}
    }
    observability::set_indexed_requests(index.len());
}

/// Feed a secret watch event to the tracker, returning the upstream to refresh
///
/// Relisted secrets whose version moved while the watch was down count as updates.
pub fn upstream_to_refresh(
    tracker: &mut VersionTracker,
    event: &watcher::Event<Secret>,
    cache_namespace: &str,
) -> Option<String> {
    match event {
        watcher::Event::Init => {
            tracker.begin_resync();
            None
        }
        watcher::Event::InitDone => {
            tracker.finish_resync();
            None
        }
        watcher::Event::Apply(secret) | watcher::Event::InitApply(secret) => {
            let change = tracker.observe(secret);
            propagation_target(&change, cache_namespace).map(str::to_string)
        }
        watcher::Event::Delete(secret) => {
            let change = tracker.forget(secret);
            propagation_target(&change, cache_namespace).map(str::to_string)
        }
    }
}

/// Start the request watch that keeps the upstream index current
pub fn start_request_index_watch(
    requests: Api<CachedCertificate>,
    index: UpstreamIndex,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting CachedCertificate index watch");

        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = watcher(requests, config).default_backoff();
        pin_mut!(stream);

        while let Some(event_result) = stream.next().await {
            match event_result {
                Ok(event) => apply_request_event(&index, &event),
                Err(e) => {
                    warn!("Error watching CachedCertificates for the index: {}", e);
                }
            }
        }

        warn!("CachedCertificate index watch stream ended");
    })
}

/// Start the watch on secrets in the cache namespace
///
/// Each qualifying update is fanned out in its own task so a slow fan-out
/// never holds up the watch.
pub fn start_upstream_secret_watch(
    secrets: Api<Secret>,
    fanout: FanOut,
    cache_namespace: String,
    retry_delay: Duration,
    max_attempts: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            namespace = %cache_namespace,
            "Starting upstream secret watch"
        );

        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = watcher(secrets, config).default_backoff();
        pin_mut!(stream);
        let mut tracker = VersionTracker::new();

        while let Some(event_result) = stream.next().await {
            let event = match event_result {
                Ok(event) => event,
                Err(e) => {
                    warn!("Error watching upstream secrets: {}", e);
                    continue;
                }
            };

            if let Some(upstream) = upstream_to_refresh(&mut tracker, &event, &cache_namespace) {
                debug!(upstream = %upstream, "Upstream secret changed");
                let fanout = fanout.clone();
                tokio::spawn(async move {
                    fanout
                        .propagate_with_retry(&upstream, retry_delay, max_attempts)
                        .await;
                });
            }
        }

        warn!("Upstream secret watch stream ended");
    })
}
