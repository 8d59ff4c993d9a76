//! # Upstream Certificate
//!
//! Partial view of the cert-manager `Certificate` resource.
//!
//! The controller never depends on the full cert-manager schema. Certificates are
//! handled as [`DynamicObject`]s and read through [`UpstreamCertificate`], which
//! exposes only the fields the controller consumes and separates "field absent"
//! from "wrong type".

use crate::crd::IssuerRef;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use thiserror::Error;

/// Errors reading the upstream Certificate document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("upstream Certificate has no {0}")]
    FieldAbsent(&'static str),
    #[error("upstream Certificate field {field} is not {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("upstream Certificate field {0} is empty")]
    Empty(&'static str),
}

/// The fields of an upstream Certificate the controller reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCertificate {
    pub name: String,
    pub namespace: String,
    pub dns_names: Vec<String>,
    /// Name of the secret cert-manager writes the key material to
    pub secret_name: String,
}

impl UpstreamCertificate {
    pub const GROUP: &'static str = "cert-manager.io";
    pub const VERSION: &'static str = "v1";
    pub const KIND: &'static str = "Certificate";

    /// API resource used to build dynamic `Api`s for Certificates
    #[must_use]
    pub fn api_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            Self::GROUP,
            Self::VERSION,
            Self::KIND,
        ))
    }

    /// Build the Certificate submitted to cert-manager for a derived name.
    ///
    /// No owner reference is set: upstream Certificates are shared between
    /// requests and are never removed automatically. The secret name is the
    /// Certificate's own name so secrets stay unique in the cache namespace.
    pub fn manifest(
        name: &str,
        namespace: &str,
        dns_names: &[String],
        issuer_ref: &IssuerRef,
    ) -> Result<DynamicObject, serde_json::Error> {
        let spec = serde_json::json!({
            "dnsNames": dns_names,
            "issuerRef": serde_json::to_value(issuer_ref)?,
            "secretName": name,
        });

        Ok(DynamicObject::new(name, &Self::api_resource())
            .within(namespace)
            .data(serde_json::json!({ "spec": spec })))
    }

    /// Read the consumed fields out of a dynamic Certificate
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, SchemaError> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or(SchemaError::FieldAbsent("metadata.name"))?;
        let namespace = obj
            .metadata
            .namespace
            .clone()
            .ok_or(SchemaError::FieldAbsent("metadata.namespace"))?;

        let spec = match obj.data.get("spec") {
            None | Some(Value::Null) => return Err(SchemaError::FieldAbsent("spec")),
            Some(Value::Object(spec)) => spec,
            Some(_) => {
                return Err(SchemaError::WrongType {
                    field: "spec",
                    expected: "an object",
                })
            }
        };

        let dns_names = match spec.get("dnsNames") {
            None | Some(Value::Null) => return Err(SchemaError::FieldAbsent("spec.dnsNames")),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or(SchemaError::WrongType {
                        field: "spec.dnsNames",
                        expected: "a list of strings",
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(SchemaError::WrongType {
                    field: "spec.dnsNames",
                    expected: "a list of strings",
                })
            }
        };

        let secret_name = match spec.get("secretName") {
            None | Some(Value::Null) => return Err(SchemaError::FieldAbsent("spec.secretName")),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(SchemaError::Empty("spec.secretName"))
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(SchemaError::WrongType {
                    field: "spec.secretName",
                    expected: "a string",
                })
            }
        };

        Ok(Self {
            name,
            namespace,
            dns_names,
            secret_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> IssuerRef {
        IssuerRef {
            name: "my-issuer".to_string(),
            kind: "Issuer".to_string(),
            group: None,
        }
    }

    fn with_spec(spec: Value) -> DynamicObject {
        DynamicObject::new("cc-example.com", &UpstreamCertificate::api_resource())
            .within("cache")
            .data(serde_json::json!({ "spec": spec }))
    }

    #[test]
    fn test_manifest_uses_own_name_as_secret_name() {
        let dns = vec!["example.com".to_string()];
        let obj = UpstreamCertificate::manifest("cc-example.com", "cache", &dns, &issuer()).unwrap();

        assert_eq!(obj.metadata.name.as_deref(), Some("cc-example.com"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("cache"));
        assert!(obj.metadata.owner_references.is_none());
        assert_eq!(
            obj.data["spec"],
            serde_json::json!({
                "dnsNames": ["example.com"],
                "issuerRef": {"name": "my-issuer", "kind": "Issuer"},
                "secretName": "cc-example.com"
            })
        );
        let types = obj.types.expect("manifest carries type meta");
        assert_eq!(types.api_version, "cert-manager.io/v1");
        assert_eq!(types.kind, "Certificate");
    }

    #[test]
    fn test_from_dynamic_round_trips_manifest() {
        let dns = vec!["b.example.com".to_string(), "a.example.com".to_string()];
        let obj = UpstreamCertificate::manifest("cc-x", "cache", &dns, &issuer()).unwrap();
        let view = UpstreamCertificate::from_dynamic(&obj).unwrap();
        assert_eq!(view.dns_names, dns);
        assert_eq!(view.secret_name, "cc-x");
        assert_eq!(view.namespace, "cache");
    }

    #[test]
    fn test_missing_dns_names_is_field_absent() {
        let obj = with_spec(serde_json::json!({"secretName": "x"}));
        assert_eq!(
            UpstreamCertificate::from_dynamic(&obj),
            Err(SchemaError::FieldAbsent("spec.dnsNames"))
        );
    }

    #[test]
    fn test_non_string_dns_name_is_wrong_type() {
        let obj = with_spec(serde_json::json!({"dnsNames": ["ok", 42], "secretName": "x"}));
        assert!(matches!(
            UpstreamCertificate::from_dynamic(&obj),
            Err(SchemaError::WrongType {
                field: "spec.dnsNames",
                ..
            })
        ));
    }

    #[test]
    fn test_secret_name_errors_are_distinct() {
        let absent = with_spec(serde_json::json!({"dnsNames": ["a"]}));
        assert_eq!(
            UpstreamCertificate::from_dynamic(&absent),
            Err(SchemaError::FieldAbsent("spec.secretName"))
        );

        let empty = with_spec(serde_json::json!({"dnsNames": ["a"], "secretName": ""}));
        assert_eq!(
            UpstreamCertificate::from_dynamic(&empty),
            Err(SchemaError::Empty("spec.secretName"))
        );

        let wrong = with_spec(serde_json::json!({"dnsNames": ["a"], "secretName": 7}));
        assert!(matches!(
            UpstreamCertificate::from_dynamic(&wrong),
            Err(SchemaError::WrongType {
                field: "spec.secretName",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_spec_is_field_absent() {
        let obj = DynamicObject::new("cc-x", &UpstreamCertificate::api_resource()).within("cache");
        assert_eq!(
            UpstreamCertificate::from_dynamic(&obj),
            Err(SchemaError::FieldAbsent("spec"))
        );
    }
}
