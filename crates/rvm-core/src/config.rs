//! Engine configuration.
//!
//! Numeric thresholds (timeouts, backoff, concurrency) are deliberately
//! configuration fields with defaults rather than constants.

use crate::bundle::AccountId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// RvmConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RvmConfig {
    /// Fixed-named role assumed in every target account. The trust
    /// relationship is provisioned externally.
    #[serde(default = "default_workflow_role")]
    pub workflow_role_name: String,

    /// Prefix of the per-account provisioning stack name.
    #[serde(default = "default_stack_prefix")]
    pub stack_prefix: String,

    /// Worker budget for concurrent account processing.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_accounts: usize,

    /// Attempts per transient (`Unavailable`) failure before the account is
    /// marked failed for this run.
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,

    /// Initial delay for status polling and transient retries.
    #[serde(default = "default_poll_initial", with = "duration_secs")]
    pub poll_initial: Duration,

    /// Ceiling for the exponential backoff.
    #[serde(default = "default_poll_cap", with = "duration_secs")]
    pub poll_cap: Duration,

    /// Per-operation budget for a stack to reach a terminal state.
    #[serde(default = "default_stack_timeout", with = "duration_secs")]
    pub stack_timeout: Duration,

    /// Credentials expiring within this margin are re-acquired before use.
    #[serde(default = "default_credential_margin", with = "duration_secs")]
    pub credential_margin: Duration,

    /// Optional wall-clock budget for the whole run. Accounts still in
    /// flight at the deadline are reported timed out and not awaited; the
    /// remote operations continue server-side.
    #[serde(default, with = "duration_secs_opt")]
    pub run_deadline: Option<Duration>,
}

fn default_workflow_role() -> String {
    "RvmWorkflowRole".to_string()
}

fn default_stack_prefix() -> String {
    "rvm-provisioned".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_transient_attempts() -> u32 {
    3
}

fn default_poll_initial() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_stack_timeout() -> Duration {
    Duration::from_secs(900)
}

fn default_credential_margin() -> Duration {
    Duration::from_secs(300)
}

impl Default for RvmConfig {
    fn default() -> Self {
        RvmConfig {
            workflow_role_name: default_workflow_role(),
            stack_prefix: default_stack_prefix(),
            max_concurrent_accounts: default_concurrency(),
            transient_attempts: default_transient_attempts(),
            poll_initial: default_poll_initial(),
            poll_cap: default_poll_cap(),
            stack_timeout: default_stack_timeout(),
            credential_margin: default_credential_margin(),
            run_deadline: None,
        }
    }
}

impl RvmConfig {
    /// Deterministic per-account stack name, e.g. `rvm-provisioned-111111111111`.
    pub fn stack_name(&self, account: &AccountId) -> String {
        format!("{}-{}", self.stack_prefix, account)
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(dur) => s.serialize_some(&dur.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
