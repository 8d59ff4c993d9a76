//! # Reconcile Flow Tests
//!
//! End-to-end request lifecycles against the in-memory store:
//! - initial sync and sharing of one upstream between requests
//! - DNS set change and revert
//! - ownership conflicts on the target secret
//! - waiting for issuance and unusable upstream secrets
//! - deletion and missing requests

mod common;

use async_trait::async_trait;
use cached_certificate_controller::constants::{SOURCE_ANNOTATION_KEY, SYNCED_LABEL_KEY};
use cached_certificate_controller::prelude::*;
use common::{spec, tls_data, Harness};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store whose first `get_upstream` misses an existing Certificate, as when
/// another request creates it between the read and the create
struct LateUpstreamStore {
    inner: InMemoryStore,
    hide_next_upstream: AtomicBool,
}

#[async_trait]
impl CertificateStore for LateUpstreamStore {
    async fn get_request(&self, key: &RequestKey) -> Result<CachedCertificate, StoreError> {
        self.inner.get_request(key).await
    }

    async fn update_request_status(
        &self,
        request: &CachedCertificate,
        status: &CachedCertificateStatus,
    ) -> Result<CachedCertificate, StoreError> {
        self.inner.update_request_status(request, status).await
    }

    async fn patch_request_state(
        &self,
        key: &RequestKey,
        state: CachedCertificateState,
    ) -> Result<(), StoreError> {
        self.inner.patch_request_state(key, state).await
    }

    async fn get_upstream(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        if self.hide_next_upstream.swap(false, Ordering::SeqCst) {
            return Err(StoreError::NotFound {
                kind: "Certificate",
                name: name.to_string(),
            });
        }
        self.inner.get_upstream(namespace, name).await
    }

    async fn create_upstream(&self, certificate: &DynamicObject) -> Result<(), StoreError> {
        self.inner.create_upstream(certificate).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.inner.get_secret(namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        self.inner.create_secret(secret).await
    }

    async fn replace_secret(
        &self,
        secret: &Secret,
        resource_version: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.replace_secret(secret, resource_version).await
    }
}

#[tokio::test]
async fn test_initial_sync() {
    let h = Harness::new();
    let key = h.submit("app", "web-tls", &["www.example.com", "example.com"], Some("web-cert"));

    // Upstream created, then waiting for cert-manager
    let action = h.settle(&key).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(2)));
    let upstream = "cc-example.com-www.example.com";
    assert_eq!(h.upstream_name(&key).as_deref(), Some(upstream));
    assert_eq!(h.status(&key).state, CachedCertificateState::Pending);
    assert!(!h.status(&key).upstream_ready);

    let certificate = h.store.upstream(&h.cache_namespace(), upstream).unwrap();
    let view = UpstreamCertificate::from_dynamic(&certificate).unwrap();
    assert_eq!(view.secret_name, upstream);
    assert_eq!(view.dns_names, vec!["www.example.com", "example.com"]);
    assert_eq!(certificate.data["spec"]["issuerRef"]["name"], "letsencrypt");

    h.issue(upstream, "cert-v1");
    assert_eq!(h.settle(&key).await.unwrap(), Action::await_change());

    let status = h.status(&key);
    assert_eq!(status.state, CachedCertificateState::Synced);
    assert!(status.upstream_ready);

    let target = h.target_secret("app", "web-cert").unwrap();
    assert_eq!(target.data, Some(tls_data("cert-v1")));
    assert_eq!(target.type_.as_deref(), Some("kubernetes.io/tls"));
    assert_eq!(
        target.metadata.labels.as_ref().unwrap()[SYNCED_LABEL_KEY],
        "true"
    );
    assert_eq!(
        target.metadata.annotations.as_ref().unwrap()[SOURCE_ANNOTATION_KEY],
        "app/web-tls"
    );
    let owners = target.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].name, "web-tls");
    assert_eq!(owners[0].controller, Some(true));
}

#[tokio::test]
async fn test_target_secret_defaults_to_request_name() {
    let h = Harness::new();
    let key = h.synced("app", "api-tls", &["api.example.com"], "cert").await;

    assert!(h.target_secret("app", "api-tls").is_some());
    assert_eq!(h.status(&key).state, CachedCertificateState::Synced);
}

#[tokio::test]
async fn test_requests_with_same_dns_set_share_one_upstream() {
    let h = Harness::new();
    let first = h
        .synced("team-a", "tls", &["a.example.com", "b.example.com"], "shared")
        .await;
    let second = h
        .synced("team-b", "tls", &["b.example.com", "a.example.com"], "unused")
        .await;

    assert_eq!(h.store.upstream_count(), 1);
    assert_eq!(h.upstream_name(&first), h.upstream_name(&second));
    assert_eq!(
        h.index.dependents("cc-a.example.com-b.example.com"),
        vec![first, second]
    );
    assert_eq!(
        h.target_secret("team-b", "tls").unwrap().data,
        Some(tls_data("shared"))
    );
}

#[tokio::test]
async fn test_upstream_created_concurrently_counts_as_created() {
    let h = Harness::new();
    h.synced("team-a", "tls", &["x.example.com"], "cert").await;
    assert_eq!(h.store.calls("create_upstream"), 1);

    let racing = LateUpstreamStore {
        inner: h.store.clone(),
        hide_next_upstream: AtomicBool::new(true),
    };
    let ctx = Arc::new(Reconciler::new(
        Arc::new(racing),
        ControllerConfig::default(),
        h.index.clone(),
    ));
    let key = h.submit("team-b", "tls", &["x.example.com"], None);
    let request = Arc::new(h.store.request(&key).unwrap());

    // The create hits AlreadyExists and the pass carries on as if it had succeeded
    let action = reconcile(request.clone(), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::ZERO));
    assert_eq!(h.store.calls("create_upstream"), 2);
    assert_eq!(h.store.upstream_count(), 1);
    assert_eq!(h.status(&key).state, CachedCertificateState::Pending);

    assert_eq!(reconcile(request, ctx).await.unwrap(), Action::await_change());
    let status = h.status(&key);
    assert_eq!(status.state, CachedCertificateState::Synced);
    assert!(status.upstream_ready);
    assert_eq!(h.store.upstream_count(), 1);
    assert_eq!(
        h.target_secret("team-b", "tls").unwrap().data,
        Some(tls_data("cert"))
    );
}

#[tokio::test]
async fn test_repeat_pass_writes_nothing() {
    let h = Harness::new();
    let key = h.synced("app", "tls", &["a.example.com"], "cert").await;
    let status_writes = h.store.calls("update_request_status");
    let version = h.target_secret("app", "tls").unwrap().metadata.resource_version;

    assert_eq!(h.reconcile(&key).await.unwrap(), Action::await_change());

    assert_eq!(h.store.calls("update_request_status"), status_writes);
    assert_eq!(h.store.calls("replace_secret"), 0);
    assert_eq!(
        h.target_secret("app", "tls").unwrap().metadata.resource_version,
        version
    );
}

#[tokio::test]
async fn test_dns_change_and_revert() {
    let h = Harness::new();
    let key = h.synced("app", "tls", &["a.example.com"], "cert-a").await;
    assert_eq!(h.upstream_name(&key).as_deref(), Some("cc-a.example.com"));

    h.store
        .update_request_spec(&key, spec(&["a.example.com", "b.example.com"], None))
        .unwrap();
    let action = h.settle(&key).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(2)));

    let status = h.status(&key);
    assert_eq!(
        status.upstream_ref.map(|r| r.name).as_deref(),
        Some("cc-a.example.com-b.example.com")
    );
    assert_eq!(status.state, CachedCertificateState::Pending);
    assert!(!status.upstream_ready);
    assert_eq!(h.store.upstream_count(), 2);
    assert!(h.index.dependents("cc-a.example.com").is_empty());

    // The old upstream is still in the cache, so reverting needs no new issuance
    h.store
        .update_request_spec(&key, spec(&["a.example.com"], None))
        .unwrap();
    assert_eq!(h.settle(&key).await.unwrap(), Action::await_change());

    assert_eq!(h.upstream_name(&key).as_deref(), Some("cc-a.example.com"));
    assert_eq!(h.status(&key).state, CachedCertificateState::Synced);
    assert_eq!(h.store.upstream_count(), 2);
    assert_eq!(
        h.target_secret("app", "tls").unwrap().data,
        Some(tls_data("cert-a"))
    );
}

#[tokio::test]
async fn test_ownership_conflict_then_recovery() {
    let h = Harness::new();
    let mut foreign = Secret {
        data: Some(BTreeMap::from([(
            "password".to_string(),
            ByteString(b"hunter2".to_vec()),
        )])),
        ..Default::default()
    };
    foreign.metadata.name = Some("tls".to_string());
    foreign.metadata.namespace = Some("app".to_string());
    let foreign = h.store.put_secret(foreign);

    let key = h.submit("app", "tls", &["a.example.com"], None);
    h.settle(&key).await.unwrap();
    h.issue("cc-a.example.com", "cert");

    let err = h.settle(&key).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcilerError::Materialize(MaterializeError::OwnershipConflict { .. })
    ));
    assert_eq!(h.status(&key).state, CachedCertificateState::Error);
    assert_eq!(h.target_secret("app", "tls"), Some(foreign.clone()));

    // The owner hands the secret over; the next pass takes it
    let mut handed_over = foreign;
    handed_over.metadata.labels = Some(BTreeMap::from([(
        "cache.weavelab.xyz/synced-from-cache".to_string(),
        "true".to_string(),
    )]));
    h.store.put_secret(handed_over);

    assert_eq!(h.settle(&key).await.unwrap(), Action::await_change());
    assert_eq!(h.status(&key).state, CachedCertificateState::Synced);
    assert_eq!(
        h.target_secret("app", "tls").unwrap().data,
        Some(tls_data("cert"))
    );
}

#[tokio::test]
async fn test_unusable_upstream_secret_is_retried() {
    let h = Harness::new();
    let key = h.submit("app", "tls", &["a.example.com"], None);
    h.settle(&key).await.unwrap();

    let mut partial = h.issue("cc-a.example.com", "cert");
    partial.data.as_mut().unwrap().remove("tls.key");
    h.store.put_secret(partial);

    let action = h.settle(&key).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(3)));
    assert!(h.status(&key).upstream_ready);
    assert_eq!(h.status(&key).state, CachedCertificateState::Pending);
    assert!(h.target_secret("app", "tls").is_none());
}

#[tokio::test]
async fn test_upstream_without_secret_name_marks_error() {
    let h = Harness::new();
    let broken = DynamicObject::new("cc-a.example.com", &UpstreamCertificate::api_resource())
        .within(&h.cache_namespace())
        .data(serde_json::json!({ "spec": { "dnsNames": ["a.example.com"] } }));
    h.store.create_upstream(&broken).await.unwrap();

    let key = h.submit("app", "tls", &["a.example.com"], None);
    let err = h.settle(&key).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcilerError::Schema(SchemaError::FieldAbsent("spec.secretName"))
    ));
    assert_eq!(h.status(&key).state, CachedCertificateState::Error);
}

#[tokio::test]
async fn test_dns_change_to_unissued_set_returns_to_pending() {
    let h = Harness::new();
    let key = h.synced("app", "tls", &["a.example.com"], "cert").await;

    // A new upstream with no issued secret yet, as after a cache wipe
    h.store
        .update_request_spec(&key, spec(&["a.example.com", "c.example.com"], None))
        .unwrap();
    h.settle(&key).await.unwrap();
    let status = h.status(&key);
    assert_eq!(status.state, CachedCertificateState::Pending);
    assert!(!status.upstream_ready);

    // Previously copied material stays in place
    assert!(h.target_secret("app", "tls").is_some());
}

#[tokio::test]
async fn test_transient_store_failure_is_returned_and_recovers() {
    let h = Harness::new();
    let key = h.submit("app", "tls", &["a.example.com"], None);
    h.settle(&key).await.unwrap();
    h.issue("cc-a.example.com", "cert");

    h.store.fail_next("get_secret", 1);
    let err = h.reconcile(&key).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert_eq!(h.status(&key).state, CachedCertificateState::Error);

    assert_eq!(h.settle(&key).await.unwrap(), Action::await_change());
    assert_eq!(h.status(&key).state, CachedCertificateState::Synced);
}

#[tokio::test]
async fn test_deleted_request_collects_secret_and_leaves_upstream() {
    let h = Harness::new();
    let key = h.synced("app", "tls", &["a.example.com"], "cert").await;

    h.store.delete_request(&key).unwrap();

    assert!(h.target_secret("app", "tls").is_none());
    assert!(h.index.dependents("cc-a.example.com").is_empty());
    assert_eq!(h.store.upstream_count(), 1);
    assert_eq!(h.reconcile(&key).await.unwrap(), Action::await_change());
}

#[tokio::test]
async fn test_missing_request_is_noop() {
    let h = Harness::new();
    let key = RequestKey::new("app", "never-created");

    assert_eq!(h.reconcile(&key).await.unwrap(), Action::await_change());
    assert_eq!(h.store.upstream_count(), 0);
    assert_eq!(h.store.calls("update_request_status"), 0);
}
