//! # Target Secret Materialization
//!
//! Builds the per-request copy of the upstream key material and decides how it
//! is written.
//!
//! The target secret mirrors the upstream secret's type, data, labels and
//! annotations, plus:
//! - the marker label `cache.weavelab.xyz/synced-from-cache: "true"`
//! - the source annotation `cache.weavelab.xyz/source: <namespace>/<name>`
//! - a controller owner reference to the request, so deleting the request
//!   garbage-collects the secret
//!
//! Only secrets carrying the marker label are ever overwritten.

use crate::constants::{
    SOURCE_ANNOTATION_KEY, SYNCED_LABEL_KEY, SYNCED_LABEL_VALUE, TLS_CERT_KEY, TLS_KEY_KEY,
};
use crate::crd::{CachedCertificate, UpstreamCertificate};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaterializeError {
    #[error("a {0} is required to build the target secret")]
    MissingInput(&'static str),
    #[error("CachedCertificate has no {0}")]
    MissingMetadata(&'static str),
    #[error("upstream secret is invalid: {0}")]
    InvalidSecret(String),
    #[error("secret {namespace}/{name} exists and is not managed by this controller")]
    OwnershipConflict { namespace: String, name: String },
}

/// Builder for the target secret of one request
///
/// All three inputs are required; a missing one fails the build with
/// [`MaterializeError::MissingInput`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetSecretBuilder<'a> {
    request: Option<&'a CachedCertificate>,
    upstream: Option<&'a UpstreamCertificate>,
    upstream_secret: Option<&'a Secret>,
}

impl<'a> TargetSecretBuilder<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn request(mut self, request: &'a CachedCertificate) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub fn upstream(mut self, upstream: &'a UpstreamCertificate) -> Self {
        self.upstream = Some(upstream);
        self
    }

    #[must_use]
    pub fn upstream_secret(mut self, secret: &'a Secret) -> Self {
        self.upstream_secret = Some(secret);
        self
    }

    pub fn build(self) -> Result<Secret, MaterializeError> {
        let request = self
            .request
            .ok_or(MaterializeError::MissingInput("CachedCertificate"))?;
        self.upstream
            .ok_or(MaterializeError::MissingInput("upstream Certificate"))?;
        let upstream_secret = self
            .upstream_secret
            .ok_or(MaterializeError::MissingInput("upstream Secret"))?;

        let name = request
            .metadata
            .name
            .as_deref()
            .ok_or(MaterializeError::MissingMetadata("name"))?;
        let namespace = request
            .metadata
            .namespace
            .as_deref()
            .ok_or(MaterializeError::MissingMetadata("namespace"))?;
        let owner = request
            .controller_owner_ref(&())
            .ok_or(MaterializeError::MissingMetadata("uid"))?;

        let mut labels = upstream_secret.labels().clone();
        labels.insert(SYNCED_LABEL_KEY.to_string(), SYNCED_LABEL_VALUE.to_string());

        let mut annotations = upstream_secret.annotations().clone();
        annotations.insert(
            SOURCE_ANNOTATION_KEY.to_string(),
            format!("{namespace}/{name}"),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(request.spec.target_secret_name(name).to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            type_: upstream_secret.type_.clone(),
            data: upstream_secret.data.clone(),
            ..Default::default()
        })
    }
}

/// Check that a secret carries the key material a TLS consumer needs
///
/// `tls.crt` and `tls.key` must be present (empty values are accepted).
/// `ca.crt` is optional and not checked.
pub fn validate_secret<'a>(secret: impl Into<Option<&'a Secret>>) -> Result<(), MaterializeError> {
    let secret = secret
        .into()
        .ok_or_else(|| MaterializeError::InvalidSecret("secret is absent".to_string()))?;

    for key in [TLS_CERT_KEY, TLS_KEY_KEY] {
        let present = secret
            .data
            .as_ref()
            .is_some_and(|data| data.contains_key(key));
        if !present {
            return Err(MaterializeError::InvalidSecret(format!("{key} not found")));
        }
    }

    Ok(())
}

/// Whether a secret carries the marker label with value `"true"`
#[must_use]
pub fn is_synced_secret(secret: &Secret) -> bool {
    secret
        .labels()
        .get(SYNCED_LABEL_KEY)
        .is_some_and(|value| value == SYNCED_LABEL_VALUE)
}

/// Whether `existing` already holds everything `desired` would write
#[must_use]
pub fn is_up_to_date(existing: &Secret, desired: &Secret) -> bool {
    existing.labels() == desired.labels()
        && existing.annotations() == desired.annotations()
        && existing.owner_references() == desired.owner_references()
        && existing.type_ == desired.type_
        && existing.data == desired.data
}

/// How the target secret is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertPlan {
    /// No secret exists at the target name
    Create,
    /// A managed secret exists and is fully replaced, guarded by its version
    Replace { resource_version: Option<String> },
}

impl UpsertPlan {
    /// Decide the write for the secret currently at the target name
    ///
    /// An existing secret without the marker label belongs to someone else and
    /// is never touched.
    pub fn decide(existing: Option<&Secret>) -> Result<Self, MaterializeError> {
        match existing {
            None => Ok(Self::Create),
            Some(secret) if !is_synced_secret(secret) => Err(MaterializeError::OwnershipConflict {
                namespace: secret.namespace().unwrap_or_default(),
                name: secret.name_any(),
            }),
            Some(secret) => Ok(Self::Replace {
                resource_version: secret.resource_version(),
            }),
        }
    }
}
