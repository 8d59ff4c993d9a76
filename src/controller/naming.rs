//! # Upstream Naming
//!
//! Deterministic naming of shared upstream Certificates.
//!
//! Requests asking for the same set of DNS names, in any order, map to the same
//! upstream name. That name is the deduplication key for the whole cache: two
//! requests share an upstream Certificate exactly when their derived names match.
//!
//! ```
//! use cached_certificate_controller::controller::naming::upstream_certificate_name;
//!
//! let a = upstream_certificate_name(&["b.example.com".into(), "a.example.com".into()]);
//! let b = upstream_certificate_name(&["a.example.com".into(), "b.example.com".into()]);
//! assert_eq!(a, "cc-a.example.com-b.example.com");
//! assert_eq!(a, b);
//! ```

use crate::constants::{HASHED_NAME_PREFIX_LENGTH, MAX_OBJECT_NAME_LENGTH, UPSTREAM_NAME_PREFIX};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derive the upstream Certificate name for a set of DNS names
///
/// The input is copied and sorted, so the caller's ordering is never touched.
/// Wildcards (`*`) and backslashes become `x`. When the prefixed name would be
/// longer than a Kubernetes object name allows, the joined names are cut to a
/// fixed prefix and the FNV-1a hash of the full joined string is appended.
///
/// An empty slice yields an empty string. The CRD schema requires at least one
/// DNS name, so this only happens for objects that bypassed validation.
#[must_use]
pub fn upstream_certificate_name(dns_names: &[String]) -> String {
    if dns_names.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&str> = dns_names.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let joined = sorted.join("-").replace(['*', '\\'], "x");

    if UPSTREAM_NAME_PREFIX.len() + joined.len() <= MAX_OBJECT_NAME_LENGTH {
        return format!("{UPSTREAM_NAME_PREFIX}{joined}");
    }

    let mut cut = HASHED_NAME_PREFIX_LENGTH;
    while !joined.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{UPSTREAM_NAME_PREFIX}{}{}",
        &joined[..cut],
        fnv1a_64_decimal(&joined)
    )
}

/// Compare two DNS-name lists as sets
///
/// Absent and empty lists are equal. Lists of different length are never equal,
/// so duplicates are significant.
#[must_use]
pub fn dns_names_match(x: &[String], y: &[String]) -> bool {
    if x.len() != y.len() {
        return false;
    }

    if x.len() == 1 {
        return x[0] == y[0];
    }

    let mut x_sorted: Vec<&String> = x.iter().collect();
    let mut y_sorted: Vec<&String> = y.iter().collect();
    x_sorted.sort_unstable();
    y_sorted.sort_unstable();

    x_sorted == y_sorted
}

/// 64-bit FNV-1a hash of a string's bytes
#[must_use]
pub fn fnv1a_64(s: &str) -> u64 {
    s.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// [`fnv1a_64`] rendered in base 10
#[must_use]
pub fn fnv1a_64_decimal(s: &str) -> String {
    fnv1a_64(s).to_string()
}
