//! # Upstream Dependency Index
//!
//! Secondary index from an upstream Certificate name to the requests that
//! currently reference it through `status.upstreamRef`.
//!
//! The index is fed by the request change stream and refreshed by the
//! reconciler after each status write, so the fan-out can find every dependent
//! of an upstream secret without listing all requests.

use crate::crd::CachedCertificate;
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Namespace and name of a request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub namespace: String,
    pub name: String,
}

impl RequestKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a request object; `None` when name or namespace is missing
    #[must_use]
    pub fn from_request(request: &CachedCertificate) -> Option<Self> {
        Some(Self::new(request.namespace()?, request.metadata.name.clone()?))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Default)]
struct IndexState {
    by_upstream: HashMap<String, BTreeSet<RequestKey>>,
    by_request: HashMap<RequestKey, String>,
}

impl IndexState {
    fn remove(&mut self, key: &RequestKey) {
        if let Some(previous) = self.by_request.remove(key) {
            if let Some(bucket) = self.by_upstream.get_mut(&previous) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.by_upstream.remove(&previous);
                }
            }
        }
    }
}

/// Shared, thread-safe upstream -> dependents index
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Debug, Clone, Default)]
pub struct UpstreamIndex {
    state: Arc<RwLock<IndexState>>,
}

impl UpstreamIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the request's current upstream reference
    ///
    /// Moves the request out of its previous bucket when the reference changed
    /// and drops it entirely when the reference is cleared.
    pub fn observe(&self, request: &CachedCertificate) {
        let Some(key) = RequestKey::from_request(request) else {
            return;
        };
        let upstream = request
            .status
            .as_ref()
            .and_then(|s| s.upstream_ref.as_ref())
            .map(|r| r.name.clone())
            .filter(|name| !name.is_empty());

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.by_request.get(&key) == upstream.as_ref() {
            return;
        }
        state.remove(&key);

        if let Some(upstream) = upstream {
            state
                .by_upstream
                .entry(upstream.clone())
                .or_default()
                .insert(key.clone());
            state.by_request.insert(key, upstream);
        }
    }

    /// Drop a deleted request
    pub fn forget(&self, key: &RequestKey) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Requests currently referencing the named upstream, in key order
    #[must_use]
    pub fn dependents(&self, upstream: &str) -> Vec<RequestKey> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_upstream
            .get(upstream)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_request
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
