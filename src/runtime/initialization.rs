//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::constants::{SERVER_POLL_INTERVAL_MS, SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::fanout::FanOut;
use crate::controller::index::UpstreamIndex;
use crate::controller::reconciler::Reconciler;
use crate::crd::CachedCertificate;
use crate::observability;
use crate::runtime::watchers::{start_request_index_watch, start_upstream_secret_watch};
use crate::server::{start_server, ServerState};
use crate::store::{CertificateStore, KubeStore};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for CachedCertificate resources in all namespaces
    pub requests: Api<CachedCertificate>,
    /// API for the secrets owned by requests, in all namespaces
    pub owned_secrets: Api<Secret>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over `LOG_LEVEL`. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
/// - Index and upstream secret watches
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    init_tracing(&config);

    info!("Starting Cached Certificate Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        cache_namespace = %config.cache_namespace,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );

    observability::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let requests: Api<CachedCertificate> = Api::all(client.clone());
    let owned_secrets: Api<Secret> = Api::all(client.clone());
    let cache_secrets: Api<Secret> = Api::namespaced(client.clone(), &config.cache_namespace);

    let index = UpstreamIndex::new();
    let store: Arc<dyn CertificateStore> =
        Arc::new(KubeStore::new(client.clone(), config.store_call_timeout()));
    let reconciler = Arc::new(Reconciler::new(store.clone(), config.clone(), index.clone()));

    check_crd_queryable(&requests).await;

    start_request_index_watch(requests.clone(), index.clone());
    start_upstream_secret_watch(
        cache_secrets,
        FanOut::new(store, index),
        config.cache_namespace.clone(),
        config.fanout_retry(),
        config.fanout_max_attempts,
    );

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        requests,
        owned_secrets,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log whether the CRD is installed and how many requests exist
///
/// Existing requests are picked up by the controller's initial list.
async fn check_crd_queryable(requests: &Api<CachedCertificate>) {
    match requests.list(&ListParams::default()).await {
        Ok(list) => {
            info!(
                "CRD is queryable, found {} existing CachedCertificate resources",
                list.items.len()
            );
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
