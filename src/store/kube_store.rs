//! # Kubernetes Store
//!
//! [`CertificateStore`] backed by the Kubernetes API.
//!
//! Every call is wrapped in `tokio::time::timeout`; when the deadline passes the
//! in-flight request is dropped and [`StoreError::Timeout`] is returned.

use super::{status_merge_patch, CertificateStore, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::controller::index::RequestKey;
use crate::crd::{
    CachedCertificate, CachedCertificateState, CachedCertificateStatus, UpstreamCertificate,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub struct KubeStore {
    client: Client,
    call_timeout: Duration,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, "store call exceeded its deadline");
                Err(StoreError::Timeout {
                    operation,
                    after: self.call_timeout,
                })
            }
        }
    }

    fn requests(&self, namespace: &str) -> Api<CachedCertificate> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn upstreams(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &UpstreamCertificate::api_resource(),
        )
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CertificateStore for KubeStore {
    async fn get_request(&self, key: &RequestKey) -> Result<CachedCertificate, StoreError> {
        self.bounded("get CachedCertificate", async {
            self.requests(&key.namespace)
                .get(&key.name)
                .await
                .map_err(|e| StoreError::from_kube(e, "CachedCertificate", &key.name))
        })
        .await
    }

    async fn update_request_status(
        &self,
        request: &CachedCertificate,
        status: &CachedCertificateStatus,
    ) -> Result<CachedCertificate, StoreError> {
        let name = request.name_any();
        let namespace = request.namespace().unwrap_or_default();
        let patch = status_merge_patch(request.metadata.resource_version.as_deref(), status)?;

        self.bounded("update CachedCertificate status", async {
            self.requests(&namespace)
                .patch_status(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await
                .map_err(|e| StoreError::from_kube(e, "CachedCertificate", &name))
        })
        .await
    }

    async fn patch_request_state(
        &self,
        key: &RequestKey,
        state: CachedCertificateState,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": { "state": state } });

        self.bounded("patch CachedCertificate state", async {
            self.requests(&key.namespace)
                .patch_status(
                    &key.name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(e, "CachedCertificate", &key.name))
        })
        .await
    }

    async fn get_upstream(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        self.bounded("get Certificate", async {
            self.upstreams(namespace)
                .get(name)
                .await
                .map_err(|e| StoreError::from_kube(e, "Certificate", name))
        })
        .await
    }

    async fn create_upstream(&self, certificate: &DynamicObject) -> Result<(), StoreError> {
        let name = certificate.name_any();
        let namespace = certificate.namespace().unwrap_or_default();

        self.bounded("create Certificate", async {
            self.upstreams(&namespace)
                .create(&PostParams::default(), certificate)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(e, "Certificate", &name))
        })
        .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.bounded("get Secret", async {
            self.secrets(namespace)
                .get(name)
                .await
                .map_err(|e| StoreError::from_kube(e, "Secret", name))
        })
        .await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        let name = secret.name_any();
        let namespace = secret.namespace().unwrap_or_default();

        self.bounded("create Secret", async {
            self.secrets(&namespace)
                .create(&PostParams::default(), secret)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(e, "Secret", &name))
        })
        .await
    }

    async fn replace_secret(
        &self,
        secret: &Secret,
        resource_version: Option<String>,
    ) -> Result<(), StoreError> {
        let name = secret.name_any();
        let namespace = secret.namespace().unwrap_or_default();
        let mut replacement = secret.clone();
        replacement.metadata.resource_version = resource_version;

        self.bounded("replace Secret", async {
            self.secrets(&namespace)
                .replace(&name, &PostParams::default(), &replacement)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(e, "Secret", &name))
        })
        .await
    }
}
