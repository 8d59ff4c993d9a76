//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use cached_certificate_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Store seam - needed for alternative backends and tests
pub use crate::store::{CertificateStore, InMemoryStore, KubeStore, StoreError};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

// Dedup and fan-out
pub use crate::controller::fanout::{FanOut, FanOutReport, SecretChange, VersionTracker};
pub use crate::controller::index::{RequestKey, UpstreamIndex};
pub use crate::controller::materialize::{MaterializeError, TargetSecretBuilder, UpsertPlan};
pub use crate::controller::naming::{dns_names_match, upstream_certificate_name};

// Config types
pub use crate::config::ControllerConfig;
