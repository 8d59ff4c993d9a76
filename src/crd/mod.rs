//! # Custom Resource Definitions
//!
//! CRD types for the Cached Certificate Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The `CachedCertificate` resource and its issuer reference
//! - `status.rs` - Status types for tracking the request lifecycle
//! - `certificate.rs` - Partial view of the upstream cert-manager `Certificate`

mod certificate;
mod spec;
mod status;

// Re-export all public types
pub use certificate::{SchemaError, UpstreamCertificate};
pub use spec::{CachedCertificate, CachedCertificateSpec, IssuerRef};
pub use status::{CachedCertificateState, CachedCertificateStatus, ObjectReference};
