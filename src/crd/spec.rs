//! # CachedCertificate Spec
//!
//! Main CRD specification types.

use serde::{Deserialize, Serialize};

/// CachedCertificate Custom Resource Definition
///
/// Requests a certificate for a set of DNS names. Requests with the same DNS
/// set share one upstream cert-manager `Certificate` in the cache namespace;
/// the issued key material is copied into `secretName` in the request namespace.
///
/// # Example
///
/// ```yaml
/// apiVersion: cache.weavelab.xyz/v1alpha1
/// kind: CachedCertificate
/// metadata:
///   name: my-service-tls
///   namespace: default
/// spec:
///   issuerRef:
///     name: letsencrypt
///     kind: ClusterIssuer
///   dnsNames:
///     - my-service.example.com
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "CachedCertificate",
    group = "cache.weavelab.xyz",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::CachedCertificateStatus",
    printcolumn = r#"{"name":"Upstream_Ready", "type":"string", "jsonPath":".status.upstreamReady"}, {"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CachedCertificateSpec {
    /// Name of the secret created once the upstream certificate has been issued.
    /// Changing this field does not create a new upstream certificate, and the
    /// previous secret is not cleaned up.
    /// Defaults to the CachedCertificate name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Issuer used when generating the upstream certificate
    pub issuer_ref: IssuerRef,
    /// DNS names for the certificate, in the order submitted.
    /// Changing this field may create a new upstream certificate in the cache namespace.
    #[schemars(length(min = 1))]
    pub dns_names: Vec<String>,
}

/// Reference to a cert-manager issuer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// Name of the issuer
    pub name: String,
    /// Issuer kind (e.g. Issuer, ClusterIssuer)
    pub kind: String,
    /// Issuer API group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl CachedCertificateSpec {
    /// Name of the target secret, falling back to the request name when unset or blank
    #[must_use]
    pub fn target_secret_name<'a>(&'a self, request_name: &'a str) -> &'a str {
        match self.secret_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => request_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_secret_name_defaults_to_request_name() {
        let spec = CachedCertificateSpec::default();
        assert_eq!(spec.target_secret_name("my-cert"), "my-cert");

        let blank = CachedCertificateSpec {
            secret_name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(blank.target_secret_name("my-cert"), "my-cert");
    }

    #[test]
    fn test_target_secret_name_uses_configured_name() {
        let spec = CachedCertificateSpec {
            secret_name: Some("tls-secret".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.target_secret_name("my-cert"), "tls-secret");
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: CachedCertificateSpec = serde_json::from_value(serde_json::json!({
            "issuerRef": {"name": "my-issuer", "kind": "Issuer"},
            "dnsNames": ["b.example.com", "a.example.com"]
        }))
        .unwrap();

        assert_eq!(spec.secret_name, None);
        assert_eq!(spec.issuer_ref.group, None);
        // order as submitted
        assert_eq!(spec.dns_names, vec!["b.example.com", "a.example.com"]);
    }

    #[test]
    fn test_issuer_ref_omits_missing_group() {
        let issuer = IssuerRef {
            name: "my-issuer".to_string(),
            kind: "Issuer".to_string(),
            group: None,
        };
        assert_eq!(
            serde_json::to_value(&issuer).unwrap(),
            serde_json::json!({"name": "my-issuer", "kind": "Issuer"})
        );
    }
}
