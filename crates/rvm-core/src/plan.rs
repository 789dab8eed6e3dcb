//! Diff planner: desired vs. observed state for one account.
//!
//! `plan` is a pure function of content, with no clock and no history. Planning
//! twice on the same inputs yields the same operation, and applying the
//! operation then planning against the resulting state yields `NoOp`.

use crate::bundle::AccountSpec;
use crate::fingerprint::Fingerprint;
use crate::state::{ProvisionedState, StackStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One planned stack operation for one account. Immutable once planned;
/// execution produces an `OperationResult`, never a mutated plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create(AccountSpec),
    Update(AccountSpec, ProvisionedState),
    Delete(ProvisionedState),
    NoOp { reason: NoOpReason },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create(_) => OperationKind::Create,
            Operation::Update(..) => OperationKind::Update,
            Operation::Delete(_) => OperationKind::Delete,
            Operation::NoOp { .. } => OperationKind::NoOp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    NoOp,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::NoOp => "no_op",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NoOpReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    /// Declared and observed content already match.
    Converged,
    /// Nothing declared and nothing provisioned.
    NothingDeclared,
    /// A remote operation is still running; mutating now would race it.
    StackBusy(StackStatus),
    /// The stack is in a terminal failure state; skipped rather than
    /// compounded.
    StackFailed(StackStatus),
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::Converged => f.write_str("already converged"),
            NoOpReason::NothingDeclared => f.write_str("nothing declared, nothing provisioned"),
            NoOpReason::StackBusy(s) => write!(f, "stack operation in progress ({s})"),
            NoOpReason::StackFailed(s) => write!(f, "stack in failure state ({s})"),
        }
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Compute the operation that converges `current` toward `spec`.
pub fn plan(spec: &AccountSpec, current: &ProvisionedState) -> Operation {
    // Safety first: never mutate a stack mid-operation or in rollback.
    if current.status.is_in_progress() {
        return Operation::NoOp {
            reason: NoOpReason::StackBusy(current.status),
        };
    }
    if current.status.is_failed() {
        return Operation::NoOp {
            reason: NoOpReason::StackFailed(current.status),
        };
    }

    if current.status == StackStatus::None {
        return if spec.roles.is_empty() {
            Operation::NoOp {
                reason: NoOpReason::NothingDeclared,
            }
        } else {
            Operation::Create(spec.clone())
        };
    }

    if spec.roles.is_empty() {
        return Operation::Delete(current.clone());
    }

    if declared_fingerprints(spec) != current.applied_roles {
        return Operation::Update(spec.clone(), current.clone());
    }

    Operation::NoOp {
        reason: NoOpReason::Converged,
    }
}

/// The fingerprint set a converged stack would report for this spec.
pub fn declared_fingerprints(spec: &AccountSpec) -> BTreeSet<Fingerprint> {
    spec.roles.iter().map(|r| r.fingerprint()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{AccountId, RoleSpec};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn account() -> AccountId {
        AccountId::new("111111111111").unwrap()
    }

    fn deploy_role() -> RoleSpec {
        RoleSpec {
            name: "DeployRole".into(),
            trust_policy: json!({"Version": "2012-10-17", "Statement": []}),
            permission_policies: vec![json!({"Effect": "Allow", "Action": "s3:*"})],
            tags: BTreeMap::new(),
        }
    }

    fn spec_with_roles(roles: Vec<RoleSpec>) -> AccountSpec {
        AccountSpec {
            account_id: account(),
            roles,
        }
    }

    fn state(status: StackStatus) -> ProvisionedState {
        ProvisionedState {
            account_id: account(),
            stack_name: "rvm-provisioned-111111111111".into(),
            status,
            applied_roles: BTreeSet::new(),
        }
    }

    #[test]
    fn new_account_plans_create() {
        let spec = spec_with_roles(vec![deploy_role()]);
        let op = plan(&spec, &state(StackStatus::None));
        assert!(matches!(op, Operation::Create(_)));
    }

    #[test]
    fn empty_spec_against_absent_stack_is_noop() {
        let spec = spec_with_roles(vec![]);
        let op = plan(&spec, &state(StackStatus::None));
        assert_eq!(
            op,
            Operation::NoOp {
                reason: NoOpReason::NothingDeclared
            }
        );
    }

    #[test]
    fn changed_content_plans_update() {
        let spec = spec_with_roles(vec![deploy_role()]);
        let mut current = state(StackStatus::CreateComplete);
        current.applied_roles.insert(Fingerprint::from_hex("stale"));
        let op = plan(&spec, &current);
        assert_eq!(op.kind(), OperationKind::Update);
    }

    #[test]
    fn matching_content_is_converged() {
        let spec = spec_with_roles(vec![deploy_role()]);
        let mut current = state(StackStatus::UpdateComplete);
        current.applied_roles = declared_fingerprints(&spec);
        assert_eq!(
            plan(&spec, &current),
            Operation::NoOp {
                reason: NoOpReason::Converged
            }
        );
    }

    #[test]
    fn role_removal_plans_delete() {
        let spec = spec_with_roles(vec![]);
        let mut current = state(StackStatus::CreateComplete);
        current
            .applied_roles
            .insert(deploy_role().fingerprint());
        assert_eq!(plan(&spec, &current).kind(), OperationKind::Delete);
    }

    #[test]
    fn in_progress_status_always_plans_noop() {
        for status in [
            StackStatus::CreateInProgress,
            StackStatus::UpdateInProgress,
            StackStatus::DeleteInProgress,
        ] {
            // Even with declared roles (would otherwise be create/update)
            // and even with an empty spec (would otherwise be delete).
            let op = plan(&spec_with_roles(vec![deploy_role()]), &state(status));
            assert!(matches!(op, Operation::NoOp { reason: NoOpReason::StackBusy(_) }));
            let op = plan(&spec_with_roles(vec![]), &state(status));
            assert!(matches!(op, Operation::NoOp { reason: NoOpReason::StackBusy(_) }));
        }
    }

    #[test]
    fn failed_status_always_plans_noop() {
        for status in [StackStatus::RollbackComplete, StackStatus::Failed] {
            let op = plan(&spec_with_roles(vec![deploy_role()]), &state(status));
            assert!(matches!(op, Operation::NoOp { reason: NoOpReason::StackFailed(_) }));
        }
    }

    #[test]
    fn plan_is_idempotent() {
        let spec = spec_with_roles(vec![deploy_role()]);
        let current = state(StackStatus::None);
        assert_eq!(plan(&spec, &current), plan(&spec, &current));
    }

    #[test]
    fn convergence_create_then_noop() {
        let spec = spec_with_roles(vec![deploy_role()]);
        let op = plan(&spec, &state(StackStatus::None));
        assert_eq!(op.kind(), OperationKind::Create);

        // Simulate the state a successful create leaves behind.
        let mut after = state(StackStatus::CreateComplete);
        after.applied_roles = declared_fingerprints(&spec);
        assert_eq!(plan(&spec, &after).kind(), OperationKind::NoOp);
    }
}
