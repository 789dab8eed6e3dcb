//! Observed per-account provisioning state.
//!
//! One stack per account is the unit of observation and mutation. State is
//! read fresh at the start of each run and never cached across runs, since
//! accounts may be modified out-of-band.

use crate::bundle::AccountId;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// StackStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    None,
    CreateInProgress,
    CreateComplete,
    UpdateInProgress,
    UpdateComplete,
    RollbackComplete,
    DeleteInProgress,
    Failed,
}

impl StackStatus {
    /// A stable, completed state that may safely be updated or deleted.
    pub fn is_stable(self) -> bool {
        matches!(self, StackStatus::CreateComplete | StackStatus::UpdateComplete)
    }

    /// An operation is still running remotely. Hard safety invariant: a
    /// stack in this state is never mutated.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::DeleteInProgress
        )
    }

    /// A terminal failure state requiring out-of-band attention.
    pub fn is_failed(self) -> bool {
        matches!(self, StackStatus::RollbackComplete | StackStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StackStatus::None => "NONE",
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProvisionedState
// ---------------------------------------------------------------------------

/// A single consistent snapshot of one account's provisioned stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedState {
    pub account_id: AccountId,
    pub stack_name: String,
    pub status: StackStatus,
    pub applied_roles: BTreeSet<Fingerprint>,
}

impl ProvisionedState {
    /// The state of an account with no provisioned stack.
    pub fn absent(account_id: AccountId, stack_name: impl Into<String>) -> Self {
        ProvisionedState {
            account_id,
            stack_name: stack_name.into(),
            status: StackStatus::None,
            applied_roles: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
