//! # CRD Generator
//!
//! Generates the `CachedCertificate` CustomResourceDefinition YAML from the Rust types.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/cachedcertificate.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```
//!
//! The generated CRD includes the OpenAPI schema, the status subresource and
//! the `Upstream_Ready` and `State` printer columns.

use cached_certificate_controller::crd::CachedCertificate;
use kube::core::CustomResourceExt;

fn main() {
    let crd = CachedCertificate::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
