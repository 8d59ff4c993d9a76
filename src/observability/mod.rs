//! # Observability
//!
//! Prometheus metrics for the controller. Logging goes through `tracing`; the
//! subscriber is installed in [`crate::runtime::initialization`].

pub mod metrics;

pub use metrics::*;
