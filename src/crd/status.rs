//! # CachedCertificate Status
//!
//! Observed state of a request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the CachedCertificate resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachedCertificateStatus {
    /// Whether the upstream secret has been found in the cache namespace
    #[serde(default)]
    pub upstream_ready: bool,
    /// Upstream Certificate this request currently depends on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_ref: Option<ObjectReference>,
    /// Lifecycle state
    #[serde(default)]
    pub state: CachedCertificateState,
}

/// Lifecycle state of a request
///
/// `Pending` is the initial state and the state entered on drift or upstream
/// changes. `Synced` and `Error` are stable until something invalidates them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum CachedCertificateState {
    #[default]
    Pending,
    Synced,
    Error,
}

impl CachedCertificateState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CachedCertificateState::Pending => "Pending",
            CachedCertificateState::Synced => "Synced",
            CachedCertificateState::Error => "Error",
        }
    }
}

impl fmt::Display for CachedCertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an object with a given name and namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ObjectReference {
    /// Name of the referenced resource
    pub name: String,
    /// Namespace of the referenced resource
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_status_defaults_to_pending() {
        let status: CachedCertificateStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.state, CachedCertificateState::Pending);
        assert!(!status.upstream_ready);
        assert!(status.upstream_ref.is_none());
    }

    #[test]
    fn test_status_wire_format() {
        let status = CachedCertificateStatus {
            upstream_ready: true,
            upstream_ref: Some(ObjectReference {
                name: "cc-example.com".to_string(),
                namespace: "cache".to_string(),
            }),
            state: CachedCertificateState::Synced,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "upstreamReady": true,
                "upstreamRef": {"name": "cc-example.com", "namespace": "cache"},
                "state": "Synced"
            })
        );
    }
}
