//! Bundle loading and validation.
//!
//! A bundle is a zip archive containing `manifest.json`: the declarative
//! statement of which IAM roles should exist in which accounts. Parsing and
//! validation happen eagerly, before any cross-account call is attempted, so
//! a structurally invalid bundle is never partially applied.

use crate::error::{Result, RvmError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{Cursor, Read};

pub const MANIFEST_NAME: &str = "manifest.json";

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// A validated 12-digit AWS account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() == 12 && raw.chars().all(|c| c.is_ascii_digit()) {
            Ok(AccountId(raw))
        } else {
            Err(RvmError::InvalidAccountId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = RvmError;

    fn from_str(s: &str) -> Result<Self> {
        AccountId::new(s)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        AccountId::new(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// RoleSpec / AccountSpec
// ---------------------------------------------------------------------------

/// One declared IAM role: name, trust policy, inline permission policies
/// (order-preserved), and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub trust_policy: serde_json::Value,
    pub permission_policies: Vec<serde_json::Value>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// The desired role configuration for exactly one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSpec {
    pub account_id: AccountId,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
}

// ---------------------------------------------------------------------------
// BundleRef / Bundle
// ---------------------------------------------------------------------------

/// Content reference identifying one immutable bundle artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRef {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)?;
        if let Some(v) = &self.version_id {
            write!(f, "@{v}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    accounts: Vec<AccountSpec>,
}

/// A validated configuration bundle: the desired role state for every
/// declared account.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub reference: BundleRef,
    pub accounts: Vec<AccountSpec>,
}

impl Bundle {
    /// Parse and validate a bundle from raw zip bytes.
    ///
    /// All structural validation happens here; a `Bundle` value is valid by
    /// construction.
    pub fn from_zip_bytes(reference: BundleRef, bytes: &[u8]) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| RvmError::MalformedBundle(format!("not a readable zip archive: {e}")))?;

        let mut raw = String::new();
        archive
            .by_name(MANIFEST_NAME)
            .map_err(|_| RvmError::MalformedBundle(format!("archive has no {MANIFEST_NAME}")))?
            .read_to_string(&mut raw)
            .map_err(|e| RvmError::MalformedBundle(format!("failed to read {MANIFEST_NAME}: {e}")))?;

        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| RvmError::MalformedBundle(format!("invalid {MANIFEST_NAME}: {e}")))?;

        let bundle = Bundle {
            reference,
            accounts: manifest.accounts,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    fn validate(&self) -> Result<()> {
        let mut seen_accounts = HashSet::new();
        for spec in &self.accounts {
            if !seen_accounts.insert(&spec.account_id) {
                return Err(RvmError::MalformedBundle(format!(
                    "duplicate account id {}",
                    spec.account_id
                )));
            }

            let mut seen_roles = HashSet::new();
            for role in &spec.roles {
                if role.name.is_empty() {
                    return Err(RvmError::MalformedBundle(format!(
                        "account {}: role with empty name",
                        spec.account_id
                    )));
                }
                if !seen_roles.insert(role.name.as_str()) {
                    return Err(RvmError::MalformedBundle(format!(
                        "account {}: duplicate role name '{}'",
                        spec.account_id, role.name
                    )));
                }
                if !role.trust_policy.is_object() {
                    return Err(RvmError::MalformedBundle(format!(
                        "account {}: role '{}' trust policy is not a JSON object",
                        spec.account_id, role.name
                    )));
                }
                if role.permission_policies.is_empty() {
                    return Err(RvmError::MalformedBundle(format!(
                        "account {}: role '{}' declares no permission policies",
                        spec.account_id, role.name
                    )));
                }
                if role.permission_policies.iter().any(|p| !p.is_object()) {
                    return Err(RvmError::MalformedBundle(format!(
                        "account {}: role '{}' has a non-object permission policy",
                        spec.account_id, role.name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
