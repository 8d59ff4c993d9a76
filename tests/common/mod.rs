//! Common test utilities for the controller flow tests
//!
//! Provides a harness wiring the real reconciler, index and fan-out to an
//! in-memory store, plus helpers that play the part of users and cert-manager.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use cached_certificate_controller::prelude::*;
use cached_certificate_controller::constants::CERTIFICATE_NAME_ANNOTATION_KEY;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Passes allowed before a flow is considered stuck
const MAX_PASSES: usize = 10;

pub fn issuer() -> IssuerRef {
    IssuerRef {
        name: "letsencrypt".to_string(),
        kind: "ClusterIssuer".to_string(),
        group: Some("cert-manager.io".to_string()),
    }
}

pub fn spec(dns_names: &[&str], secret_name: Option<&str>) -> CachedCertificateSpec {
    CachedCertificateSpec {
        secret_name: secret_name.map(str::to_string),
        issuer_ref: issuer(),
        dns_names: dns_names.iter().map(|s| (*s).to_string()).collect(),
    }
}

pub fn tls_data(cert: &str) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        ("tls.crt".to_string(), ByteString(cert.as_bytes().to_vec())),
        ("tls.key".to_string(), ByteString(b"key".to_vec())),
        ("ca.crt".to_string(), ByteString(b"ca".to_vec())),
    ])
}

pub struct Harness {
    pub store: InMemoryStore,
    pub index: UpstreamIndex,
    pub ctx: Arc<Reconciler>,
    pub fanout: FanOut,
}

impl Harness {
    pub fn new() -> Self {
        let index = UpstreamIndex::new();
        let store = InMemoryStore::new().with_index(index.clone());
        let ctx = Arc::new(Reconciler::new(
            Arc::new(store.clone()),
            ControllerConfig::default(),
            index.clone(),
        ));
        let fanout = FanOut::new(Arc::new(store.clone()), index.clone());
        Self {
            store,
            index,
            ctx,
            fanout,
        }
    }

    pub fn cache_namespace(&self) -> String {
        self.ctx.config.cache_namespace.clone()
    }

    /// Create a request as a user would
    pub fn submit(
        &self,
        namespace: &str,
        name: &str,
        dns_names: &[&str],
        secret_name: Option<&str>,
    ) -> RequestKey {
        let mut request = CachedCertificate::new(name, spec(dns_names, secret_name));
        request.metadata.namespace = Some(namespace.to_string());
        self.store.insert_request(request);
        RequestKey::new(namespace, name)
    }

    /// Run one pass for a request, as the controller would on a change event
    pub async fn reconcile(&self, key: &RequestKey) -> Result<Action, ReconcilerError> {
        let request = self.store.request(key).unwrap_or_else(|| {
            let mut stub = CachedCertificate::new(&key.name, spec(&[], None));
            stub.metadata.namespace = Some(key.namespace.clone());
            stub
        });
        reconcile(Arc::new(request), self.ctx.clone()).await
    }

    /// Run passes while the reconciler asks for an immediate requeue
    pub async fn settle(&self, key: &RequestKey) -> Result<Action, ReconcilerError> {
        for _ in 0..MAX_PASSES {
            let action = self.reconcile(key).await?;
            if action != Action::requeue(Duration::ZERO) {
                return Ok(action);
            }
        }
        panic!("{key} did not settle within {MAX_PASSES} passes");
    }

    /// Write the upstream secret as cert-manager would after issuance
    pub fn issue(&self, upstream: &str, cert: &str) -> Secret {
        let mut secret = Secret {
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(tls_data(cert)),
            ..Default::default()
        };
        secret.metadata.name = Some(upstream.to_string());
        secret.metadata.namespace = Some(self.cache_namespace());
        secret.metadata.annotations = Some(BTreeMap::from([(
            CERTIFICATE_NAME_ANNOTATION_KEY.to_string(),
            upstream.to_string(),
        )]));
        self.store.put_secret(secret)
    }

    pub fn status(&self, key: &RequestKey) -> CachedCertificateStatus {
        self.store
            .request(key)
            .and_then(|request| request.status)
            .unwrap_or_default()
    }

    pub fn upstream_name(&self, key: &RequestKey) -> Option<String> {
        self.status(key).upstream_ref.map(|r| r.name)
    }

    pub fn target_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.store.secret(namespace, name)
    }

    /// Submit, wait for issuance and sync a request in one go
    pub async fn synced(
        &self,
        namespace: &str,
        name: &str,
        dns_names: &[&str],
        cert: &str,
    ) -> RequestKey {
        let key = self.submit(namespace, name, dns_names, None);
        self.settle(&key).await.unwrap();
        let upstream = self.upstream_name(&key).unwrap();
        if self.store.secret(&self.cache_namespace(), &upstream).is_none() {
            self.issue(&upstream, cert);
        }
        assert_eq!(self.settle(&key).await.unwrap(), Action::await_change());
        key
    }
}
