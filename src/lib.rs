//! Cached Certificate Controller Library
//!
//! Deduplicates cert-manager `Certificate` resources: requests for the same set
//! of DNS names share one upstream Certificate in a cache namespace, and the
//! issued key material is copied into a secret next to each request.
//!
//! ## Quick Start
//!
//! ```rust
//! use cached_certificate_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod store;
