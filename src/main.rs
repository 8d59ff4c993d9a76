//! # Cached Certificate Controller
//!
//! A Kubernetes controller that deduplicates cert-manager certificates.
//!
//! ## Overview
//!
//! 1. **Watching requests** - Monitors `CachedCertificate` resources in all namespaces
//! 2. **Sharing upstreams** - Requests with the same DNS set share one cert-manager
//!    `Certificate` in the cache namespace
//! 3. **Copying key material** - The issued secret is copied next to each request
//! 4. **Propagating renewals** - A re-issued upstream secret marks every dependent
//!    request `Pending` so the new material is copied out
//!
//! Configuration comes from environment variables (see [`ControllerConfig::from_env`]);
//! the flags below override them.

use anyhow::Result;
use cached_certificate_controller::config::ControllerConfig;
use cached_certificate_controller::runtime::initialization::initialize;
use cached_certificate_controller::runtime::watch_loop::run_watch_loop;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cached-certificate-controller")]
#[command(version, about = "Deduplicates cert-manager Certificates across namespaces", long_about = None)]
struct Args {
    /// Namespace holding the shared upstream Certificates (overrides CACHE_NAMESPACE)
    #[arg(long)]
    cache_namespace: Option<String>,

    /// Port of the metrics and probe server (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(cache_namespace) = self.cache_namespace {
            config.cache_namespace = cache_namespace;
        }
        if let Some(metrics_port) = self.metrics_port {
            config.metrics_port = metrics_port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.apply(ControllerConfig::from_env());

    let init = initialize(config).await?;

    run_watch_loop(
        init.requests,
        init.owned_secrets,
        init.reconciler,
        init.server_state,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_environment() {
        let args = Args::parse_from([
            "cached-certificate-controller",
            "--cache-namespace",
            "certs",
            "--metrics-port",
            "9090",
        ]);
        let config = args.apply(ControllerConfig::default());
        assert_eq!(config.cache_namespace, "certs");
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn test_no_flags_keep_environment() {
        let args = Args::parse_from(["cached-certificate-controller"]);
        assert_eq!(
            args.apply(ControllerConfig::default()),
            ControllerConfig::default()
        );
    }
}
