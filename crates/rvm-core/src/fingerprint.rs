//! Content fingerprinting for declared roles.
//!
//! A fingerprint is a SHA-256 over the canonical form of a role's name,
//! trust policy, permission policies (order-preserved), and tags. Canonical
//! JSON sorts object keys recursively and preserves array order, so the
//! fingerprint is a pure function of content: reordering keys inside a
//! policy document or reordering tags does not change it, reordering the
//! permission policy sequence does.

use crate::bundle::RoleSpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 digest identifying one role's declared content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed digest, e.g. one read back from remote state.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RoleSpec {
    /// Compute the content fingerprint for this role.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"name:");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\ntrust:");
        hasher.update(canonical_json(&self.trust_policy));
        for policy in &self.permission_policies {
            hasher.update(b"\npolicy:");
            hasher.update(canonical_json(policy));
        }
        // BTreeMap iterates in key order, so tag insertion order is invisible.
        for (k, v) in &self.tags {
            hasher.update(b"\ntag:");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Fingerprint(hex)
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Serialize a JSON value with object keys sorted recursively.
///
/// Independent of serde_json's map ordering, so fingerprints stay stable
/// across feature unification of `preserve_order`.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut Vec<u8>) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(serde_json::to_string(key).unwrap_or_default().as_bytes());
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => {
            out.extend_from_slice(other.to_string().as_bytes());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
