//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::index::{RequestKey, UpstreamIndex};
use crate::controller::materialize::MaterializeError;
use crate::crd::SchemaError;
use crate::store::{CertificateStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("CachedCertificate has no namespace or name")]
    MissingObjectKey,
    #[error("CachedCertificate has no dnsNames")]
    NoDnsNames,
}

impl ReconcilerError {
    /// Short label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::Timeout { .. }) => "timeout",
            Self::Store(StoreError::Conflict { .. }) => "conflict",
            Self::Store(_) => "store",
            Self::Schema(_) => "schema",
            Self::Materialize(MaterializeError::OwnershipConflict { .. }) => "ownership-conflict",
            Self::Materialize(_) => "materialize",
            Self::MissingObjectKey => "missing-object-key",
            Self::NoDnsNames => "no-dns-names",
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn CertificateStore>,
    pub config: ControllerConfig,
    pub index: UpstreamIndex,
    // Backoff state per resource, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<RequestKey, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache_namespace", &self.config.cache_namespace)
            .field("indexed_requests", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        config: ControllerConfig,
        index: UpstreamIndex,
    ) -> Self {
        Self {
            store,
            config,
            index,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget accumulated errors for a resource after a successful pass
    pub fn reset_backoff(&self, key: &RequestKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}
