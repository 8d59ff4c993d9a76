//! # Store
//!
//! The seam between the reconciler and the cluster.
//!
//! Each implementation implements the [`CertificateStore`] trait:
//! - [`KubeStore`] talks to the Kubernetes API, bounding every call with a deadline
//! - [`InMemoryStore`] keeps objects in memory and is used by the tests

use crate::controller::index::RequestKey;
use crate::crd::{CachedCertificate, CachedCertificateState, CachedCertificateStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: &'static str, name: String },
    #[error("{operation} did not complete within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Kubernetes API error: {0}")]
    Api(#[source] Box<kube::Error>),
    #[error("failed to serialize object: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a Kubernetes client error for an object of the given kind
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
            },
            kube::Error::SerdeError(e) => Self::Serialization(e),
            other => Self::Api(Box::new(other)),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Cluster operations used by the reconciler and the fan-out
///
/// Upstream Certificates are passed as dynamic objects; the reconciler reads
/// them through [`crate::crd::UpstreamCertificate`].
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Fetch a request
    async fn get_request(&self, key: &RequestKey) -> Result<CachedCertificate, StoreError>;

    /// Write a request's status, failing with `Conflict` when the stored
    /// resource version differs from `request`'s. Returns the updated object.
    async fn update_request_status(
        &self,
        request: &CachedCertificate,
        status: &CachedCertificateStatus,
    ) -> Result<CachedCertificate, StoreError>;

    /// Set only `status.state`, without a version check
    async fn patch_request_state(
        &self,
        key: &RequestKey,
        state: CachedCertificateState,
    ) -> Result<(), StoreError>;

    /// Fetch an upstream Certificate
    async fn get_upstream(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError>;

    /// Create an upstream Certificate
    async fn create_upstream(&self, certificate: &DynamicObject) -> Result<(), StoreError>;

    /// Fetch a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Create a secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), StoreError>;

    /// Replace a secret in full, guarded by `resource_version` when given
    async fn replace_secret(
        &self,
        secret: &Secret,
        resource_version: Option<String>,
    ) -> Result<(), StoreError>;
}

/// Merge patch writing a full status, guarded by the object's resource version
///
/// Absent optional fields are sent as explicit nulls so a cleared
/// `upstreamRef` is removed from the stored object.
pub(crate) fn status_merge_patch(
    resource_version: Option<&str>,
    status: &CachedCertificateStatus,
) -> Result<Value, serde_json::Error> {
    let mut status_value = serde_json::to_value(status)?;
    if let Value::Object(fields) = &mut status_value {
        fields.entry("upstreamRef").or_insert(Value::Null);
    }

    let mut patch = serde_json::json!({ "status": status_value });
    if let Some(rv) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    Ok(patch)
}
