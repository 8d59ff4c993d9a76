//! # In-Memory Store
//!
//! [`CertificateStore`] over process memory.
//!
//! Objects get increasing resource versions on every write and generated UIDs
//! on creation. Stale status writes fail with `Conflict`, duplicate creates
//! with `AlreadyExists`, like the API server. Deleting a request removes the
//! secrets it controls, standing in for the garbage collector.
//!
//! Failures can be injected per operation with [`InMemoryStore::fail_next`].

use super::{CertificateStore, StoreError};
use crate::controller::index::{RequestKey, UpstreamIndex};
use crate::crd::{
    CachedCertificate, CachedCertificateSpec, CachedCertificateState, CachedCertificateStatus,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type ObjectKey = (String, String);

#[derive(Debug, Default)]
struct MemoryState {
    requests: BTreeMap<RequestKey, CachedCertificate>,
    upstreams: BTreeMap<ObjectKey, DynamicObject>,
    secrets: BTreeMap<ObjectKey, Secret>,
    last_version: u64,
    failures: HashMap<&'static str, u32>,
    calls: HashMap<&'static str, u32>,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn enter(&mut self, operation: &'static str) -> Result<(), StoreError> {
        *self.calls.entry(operation).or_default() += 1;
        match self.failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Timeout {
                    operation,
                    after: Duration::ZERO,
                })
            }
            _ => Ok(()),
        }
    }
}

fn object_key(namespace: Option<String>, name: String) -> ObjectKey {
    (namespace.unwrap_or_default(), name)
}

/// Shared in-memory object store
///
/// Cloning is cheap and every clone sees the same objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    index: Option<UpstreamIndex>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `index` current on every request write, like the request watcher does
    #[must_use]
    pub fn with_index(mut self, index: UpstreamIndex) -> Self {
        self.index = Some(index);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, request: &CachedCertificate) {
        if let Some(index) = &self.index {
            index.observe(request);
        }
    }

    /// Make the next `times` calls of `operation` fail with a timeout
    ///
    /// Operation names match the trait methods, e.g. `"get_secret"`.
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        self.lock().failures.insert(operation, times);
    }

    /// Number of calls made to `operation` so far
    #[must_use]
    pub fn calls(&self, operation: &'static str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or_default()
    }

    /// Create a request, assigning a UID and resource version
    pub fn insert_request(&self, mut request: CachedCertificate) -> CachedCertificate {
        let stored = {
            let mut state = self.lock();
            let version = state.next_version();
            request.metadata.resource_version = Some(version);
            if request.metadata.uid.is_none() {
                request.metadata.uid = Some(format!("uid-{}", state.last_version));
            }
            request.metadata.generation = Some(1);
            if let Some(key) = RequestKey::from_request(&request) {
                state.requests.insert(key, request.clone());
            }
            request
        };
        self.notify(&stored);
        stored
    }

    /// Replace a request's spec as a user edit would
    pub fn update_request_spec(
        &self,
        key: &RequestKey,
        spec: CachedCertificateSpec,
    ) -> Option<CachedCertificate> {
        let mut state = self.lock();
        let version = state.next_version();
        let request = state.requests.get_mut(key)?;
        request.spec = spec;
        request.metadata.resource_version = Some(version);
        request.metadata.generation = Some(request.metadata.generation.unwrap_or_default() + 1);
        Some(request.clone())
    }

    /// Delete a request and every secret it controls
    pub fn delete_request(&self, key: &RequestKey) -> Option<CachedCertificate> {
        let removed = {
            let mut state = self.lock();
            let removed = state.requests.remove(key)?;
            let uid = removed.metadata.uid.clone();
            state.secrets.retain(|_, secret| {
                !secret
                    .owner_references()
                    .iter()
                    .any(|owner| owner.controller == Some(true) && Some(&owner.uid) == uid.as_ref())
            });
            removed
        };
        if let Some(index) = &self.index {
            index.forget(key);
        }
        Some(removed)
    }

    /// Create or overwrite a secret outside the controller, bumping its version
    pub fn put_secret(&self, mut secret: Secret) -> Secret {
        let mut state = self.lock();
        secret.metadata.resource_version = Some(state.next_version());
        let key = object_key(secret.namespace(), secret.name_any());
        state.secrets.insert(key, secret.clone());
        secret
    }

    #[must_use]
    pub fn request(&self, key: &RequestKey) -> Option<CachedCertificate> {
        self.lock().requests.get(key).cloned()
    }

    #[must_use]
    pub fn upstream(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .upstreams
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.lock().upstreams.len()
    }

    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl CertificateStore for InMemoryStore {
    async fn get_request(&self, key: &RequestKey) -> Result<CachedCertificate, StoreError> {
        let mut state = self.lock();
        state.enter("get_request")?;
        state
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "CachedCertificate",
                name: key.name.clone(),
            })
    }

    async fn update_request_status(
        &self,
        request: &CachedCertificate,
        status: &CachedCertificateStatus,
    ) -> Result<CachedCertificate, StoreError> {
        let updated = {
            let mut state = self.lock();
            state.enter("update_request_status")?;
            let key = RequestKey::from_request(request).ok_or_else(|| StoreError::NotFound {
                kind: "CachedCertificate",
                name: request.name_any(),
            })?;
            let version = state.next_version();
            let stored = state
                .requests
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "CachedCertificate",
                    name: key.name.clone(),
                })?;
            if request.metadata.resource_version.is_some()
                && stored.metadata.resource_version != request.metadata.resource_version
            {
                return Err(StoreError::Conflict {
                    kind: "CachedCertificate",
                    name: key.name,
                });
            }
            stored.status = Some(status.clone());
            stored.metadata.resource_version = Some(version);
            stored.clone()
        };
        self.notify(&updated);
        Ok(updated)
    }

    async fn patch_request_state(
        &self,
        key: &RequestKey,
        new_state: CachedCertificateState,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter("patch_request_state")?;
        let version = state.next_version();
        let stored = state
            .requests
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "CachedCertificate",
                name: key.name.clone(),
            })?;
        stored.status.get_or_insert_with(Default::default).state = new_state;
        stored.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn get_upstream(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        let mut state = self.lock();
        state.enter("get_upstream")?;
        state
            .upstreams
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Certificate",
                name: name.to_string(),
            })
    }

    async fn create_upstream(&self, certificate: &DynamicObject) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter("create_upstream")?;
        let key = object_key(certificate.namespace(), certificate.name_any());
        if state.upstreams.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Certificate",
                name: key.1,
            });
        }
        let mut stored = certificate.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.upstreams.insert(key, stored);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        let mut state = self.lock();
        state.enter("get_secret")?;
        state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret",
                name: name.to_string(),
            })
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter("create_secret")?;
        let key = object_key(secret.namespace(), secret.name_any());
        if state.secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Secret",
                name: key.1,
            });
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.secrets.insert(key, stored);
        Ok(())
    }

    async fn replace_secret(
        &self,
        secret: &Secret,
        resource_version: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter("replace_secret")?;
        let key = object_key(secret.namespace(), secret.name_any());
        let version = state.next_version();
        let stored = state
            .secrets
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret",
                name: key.1.clone(),
            })?;
        if resource_version.is_some() && stored.metadata.resource_version != resource_version {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name: key.1,
            });
        }
        let mut replacement = secret.clone();
        replacement.metadata.resource_version = Some(version);
        *stored = replacement;
        Ok(())
    }
}
