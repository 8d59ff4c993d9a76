//! # Reconciler
//!
//! Core reconciliation logic for `CachedCertificate` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Derive the upstream Certificate name from the DNS set and record it
//! 2. Create the upstream Certificate in the cache namespace if missing
//! 3. Release the upstream when the request's DNS set no longer matches
//! 4. Wait for cert-manager to issue the upstream secret
//! 5. Copy the key material into the request's target secret
//! 6. Mark the request `Synced`

pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler, ReconcilerError};
